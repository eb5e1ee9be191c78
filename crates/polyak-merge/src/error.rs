//! Error types for checkpoint averaging.

use thiserror::Error;

/// Errors that can occur while averaging checkpoints.
#[derive(Debug, Error)]
pub enum AverageError {
    /// Invalid averaging configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Shape mismatch between a checkpoint and the running accumulator.
    #[error("Shape mismatch for parameter '{name}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Parameter name.
        name: String,
        /// Shape held by the accumulator.
        expected: Vec<usize>,
        /// Shape found in the later checkpoint.
        actual: Vec<usize>,
    },

    /// A parameter carries a different number of blobs than the accumulator.
    #[error("Blob count mismatch for parameter '{name}': expected {expected}, got {actual}")]
    BlobCountMismatch {
        /// Parameter name.
        name: String,
        /// Blob count held by the accumulator.
        expected: usize,
        /// Blob count found in the later checkpoint.
        actual: usize,
    },

    /// A blob sits at the same position as a differently named tensor.
    #[error("Blob name mismatch for parameter '{name}': expected '{expected}', got '{actual}'")]
    BlobNameMismatch {
        /// Parameter name.
        name: String,
        /// Tensor name held by the accumulator.
        expected: String,
        /// Tensor name found in the later checkpoint.
        actual: String,
    },

    /// Not enough checkpoints to average.
    #[error("Expected at least {expected} checkpoints, got {actual}")]
    NotEnoughCheckpoints {
        /// Expected number of checkpoints.
        expected: usize,
        /// Actual number of checkpoints.
        actual: usize,
    },

    /// Checkpoint loading error.
    #[error("Failed to load checkpoint: {0}")]
    CheckpointLoad(String),

    /// Safetensors error.
    #[error("Safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AverageError {
    /// Whether this error reports inconsistent parameter layouts across checkpoints.
    pub fn is_shape_mismatch(&self) -> bool {
        matches!(
            self,
            Self::ShapeMismatch { .. }
                | Self::BlobCountMismatch { .. }
                | Self::BlobNameMismatch { .. }
        )
    }
}

/// Result type for averaging operations.
pub type Result<T> = std::result::Result<T, AverageError>;
