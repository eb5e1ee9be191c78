//! Configuration types for checkpoint averaging.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::naming::{checkpoint_paths_with_extension, IterRange, DEFAULT_EXTENSION};
use crate::{AverageError, Result};

/// Complete averaging configuration, typically loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AverageConfig {
    /// Explicit checkpoint files, in averaging order.
    #[serde(default)]
    pub weight_files: Option<Vec<PathBuf>>,

    /// Checkpoint prefix, combined with `iter_range`.
    #[serde(default)]
    pub weight_prefix: Option<String>,

    /// Iterations to average, combined with `weight_prefix`.
    #[serde(default)]
    pub iter_range: Option<IterRange>,

    /// Extension of prefix-generated checkpoint files.
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Output path for the averaged checkpoint.
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Output dtype.
    #[serde(default)]
    pub dtype: OutputDtype,

    /// Optional architecture file restricting which parameters are averaged.
    #[serde(default)]
    pub architecture: Option<PathBuf>,
}

/// Upper bound on checkpoints generated from a prefix and iteration range.
pub const MAX_RANGE_CHECKPOINTS: usize = 100_000;

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

/// Storage dtype of the averaged checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputDtype {
    /// Keep each tensor's dtype from the first checkpoint.
    #[default]
    Preserve,
    /// 32-bit float.
    Float32,
    /// IEEE half precision.
    Float16,
    /// Brain float.
    Bfloat16,
}

impl AverageConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Resolve the ordered list of checkpoints to average.
    ///
    /// Explicit files take precedence over a prefix and iteration range.
    pub fn checkpoint_files(&self) -> Result<Vec<PathBuf>> {
        if let Some(files) = &self.weight_files {
            return Ok(files.clone());
        }

        match (&self.weight_prefix, &self.iter_range) {
            (Some(prefix), Some(range)) => {
                if range.len() > MAX_RANGE_CHECKPOINTS {
                    return Err(AverageError::InvalidConfig(format!(
                        "iteration range {range} yields more than {MAX_RANGE_CHECKPOINTS} checkpoints"
                    )));
                }
                Ok(checkpoint_paths_with_extension(
                    prefix,
                    range,
                    &self.extension,
                ))
            }
            _ => Err(AverageError::InvalidConfig(
                "must provide either weight files or weight prefix and iter range".to_string(),
            )),
        }
    }

    /// Output path, required before running.
    pub fn output_path(&self) -> Result<&Path> {
        self.output
            .as_deref()
            .ok_or_else(|| AverageError::InvalidConfig("output path is required".to_string()))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let files = self.checkpoint_files()?;
        if files.is_empty() {
            return Err(AverageError::NotEnoughCheckpoints {
                expected: 1,
                actual: 0,
            });
        }

        self.output_path()?;
        Ok(())
    }
}

impl Default for AverageConfig {
    fn default() -> Self {
        Self {
            weight_files: None,
            weight_prefix: None,
            iter_range: None,
            extension: default_extension(),
            output: None,
            dtype: OutputDtype::default(),
            architecture: None,
        }
    }
}
