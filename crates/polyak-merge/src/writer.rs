//! Writing averaged checkpoints.

use std::collections::HashMap;
use std::path::Path;

use safetensors::tensor::TensorView;
use safetensors::Dtype;
use tracing::info;

use crate::{AverageError, AveragedParameterSet, OutputDtype, ParamArray, Result, Tensor};

/// Metadata key recording how many checkpoints were averaged.
pub const AVERAGED_CHECKPOINTS_KEY: &str = "averaged_checkpoints";

/// Trait for persisting an averaged parameter set.
pub trait CheckpointWriter {
    /// Write `set`, the average of `checkpoints` inputs, to `path`.
    fn save(&self, set: &AveragedParameterSet, checkpoints: usize, path: &Path) -> Result<()>;
}

/// Writer producing a single safetensors file.
#[derive(Debug, Clone, Default)]
pub struct SafetensorsWriter {
    dtype: OutputDtype,
}

impl SafetensorsWriter {
    /// Create a writer with the given output dtype.
    pub fn new(dtype: OutputDtype) -> Self {
        Self { dtype }
    }

    fn target_dtype(&self, tensor: &Tensor) -> Dtype {
        match self.dtype {
            OutputDtype::Preserve => match tensor.dtype() {
                Dtype::F16 => Dtype::F16,
                Dtype::BF16 => Dtype::BF16,
                _ => Dtype::F32,
            },
            OutputDtype::Float32 => Dtype::F32,
            OutputDtype::Float16 => Dtype::F16,
            OutputDtype::Bfloat16 => Dtype::BF16,
        }
    }
}

fn encode(dtype: Dtype, values: &[f32]) -> Vec<u8> {
    match dtype {
        Dtype::F16 => {
            let halfs: Vec<half::f16> = values.iter().map(|&v| half::f16::from_f32(v)).collect();
            bytemuck::cast_slice(&halfs).to_vec()
        }
        Dtype::BF16 => {
            let halfs: Vec<half::bf16> = values.iter().map(|&v| half::bf16::from_f32(v)).collect();
            bytemuck::cast_slice(&halfs).to_vec()
        }
        _ => bytemuck::cast_slice(values).to_vec(),
    }
}

impl CheckpointWriter for SafetensorsWriter {
    fn save(&self, set: &AveragedParameterSet, checkpoints: usize, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let encoded: Vec<(&str, Dtype, &[usize], Vec<u8>)> = set
            .iter()
            .flat_map(|(_, blobs)| blobs.iter())
            .map(|blob| {
                let dtype = self.target_dtype(&blob.data);
                (
                    blob.name.as_str(),
                    dtype,
                    blob.data.shape(),
                    encode(dtype, blob.data.as_slice()),
                )
            })
            .collect();

        let views = encoded
            .iter()
            .map(|(name, dtype, shape, bytes)| {
                TensorView::new(*dtype, shape.to_vec(), bytes)
                    .map(|view| (*name, view))
                    .map_err(AverageError::from)
            })
            .collect::<Result<Vec<_>>>()?;

        let metadata = HashMap::from([(
            AVERAGED_CHECKPOINTS_KEY.to_string(),
            checkpoints.to_string(),
        )]);

        info!("Writing {} tensors to {:?}", views.len(), path);
        safetensors::serialize_to_file(views, &Some(metadata), path)?;
        Ok(())
    }
}
