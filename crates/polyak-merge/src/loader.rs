//! Checkpoint loading.
//!
//! Checkpoints are single safetensors files, memory-mapped and decoded into
//! f32 [`Tensor`]s. Tensors are grouped into parameters by stripping the last
//! dotted component of their name, so `conv1.weight` and `conv1.bias` become
//! the two blobs of parameter `conv1`.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use safetensors::{Dtype, SafeTensors};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{AverageError, Blob, ParameterSet, Result, Tensor};

/// Trait for loading a checkpoint into a parameter set.
pub trait CheckpointLoader {
    /// Load the checkpoint stored at `path`.
    fn load(&self, path: &Path) -> Result<ParameterSet>;
}

/// Network description listing the parameters to load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    /// Parameter names declared by the network.
    pub parameters: Vec<String>,
}

impl Architecture {
    /// Load an architecture from a YAML or JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|e| e == "json") {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(serde_yaml::from_str(&content)?)
        }
    }
}

/// Loader for single-file safetensors checkpoints.
#[derive(Debug, Clone, Default)]
pub struct SafetensorsLoader {
    /// Parameters to keep; everything is kept when unset.
    filter: Option<HashSet<String>>,
}

impl SafetensorsLoader {
    /// Create a loader that keeps every float tensor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only load the parameters declared by `architecture`.
    pub fn with_architecture(mut self, architecture: &Architecture) -> Self {
        self.filter = Some(architecture.parameters.iter().cloned().collect());
        self
    }

    fn keeps(&self, parameter: &str) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |filter| filter.contains(parameter))
    }
}

impl CheckpointLoader for SafetensorsLoader {
    fn load(&self, path: &Path) -> Result<ParameterSet> {
        if !path.is_file() {
            return Err(AverageError::CheckpointLoad(format!(
                "{:?} is not a file",
                path
            )));
        }

        debug!("Memory-mapping {:?}", path);
        let file = std::fs::File::open(path)?;
        // SAFETY: The file is opened read-only and the map is dropped before
        // this function returns; all tensor data is copied out first.
        #[allow(unsafe_code)]
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        let tensors = SafeTensors::deserialize(&mmap)?;

        let mut grouped: BTreeMap<String, Vec<(String, Blob)>> = BTreeMap::new();
        for (name, view) in tensors.tensors() {
            let (parameter, suffix) = split_parameter_name(&name);
            if !self.keeps(parameter) {
                continue;
            }

            let Some(data) = decode_floats(view.dtype(), view.data()) else {
                warn!("Skipping non-float tensor: {} ({:?})", name, view.dtype());
                continue;
            };
            let tensor = Tensor::with_dtype(data, view.shape().to_vec(), view.dtype())
                .ok_or_else(|| {
                    AverageError::CheckpointLoad(format!(
                        "tensor {} in {:?} has inconsistent data length",
                        name, path
                    ))
                })?;

            grouped
                .entry(parameter.to_string())
                .or_default()
                .push((suffix.to_string(), Blob::new(name.clone(), tensor)));
        }

        let mut set = ParameterSet::new();
        for (parameter, mut blobs) in grouped {
            blobs.sort_by(|(a, _), (b, _)| blob_rank(a).cmp(&blob_rank(b)).then_with(|| a.cmp(b)));
            set.insert(parameter, blobs.into_iter().map(|(_, blob)| blob).collect());
        }

        info!(
            "Loaded {} parameters ({} tensors) from {:?}",
            set.len(),
            set.num_blobs(),
            path
        );
        Ok(set)
    }
}

/// Split `layer.sub.weight` into (`layer.sub`, `weight`).
fn split_parameter_name(name: &str) -> (&str, &str) {
    match name.rsplit_once('.') {
        Some((parameter, suffix)) if !parameter.is_empty() => (parameter, suffix),
        _ => (name, ""),
    }
}

/// Weights first, then biases, then everything else.
fn blob_rank(suffix: &str) -> u8 {
    match suffix {
        "weight" => 0,
        "bias" => 1,
        _ => 2,
    }
}

/// Decode little-endian float data to f32. Returns `None` for non-float dtypes.
fn decode_floats(dtype: Dtype, data: &[u8]) -> Option<Vec<f32>> {
    let floats = match dtype {
        Dtype::F32 => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::F16 => data
            .chunks_exact(2)
            .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::BF16 => data
            .chunks_exact(2)
            .map(|b| half::bf16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::F64 => data
            .chunks_exact(8)
            .map(|b| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(b);
                f64::from_le_bytes(bytes) as f32
            })
            .collect(),
        _ => return None,
    };
    Some(floats)
}
