//! Checkpoint averaging orchestration.
//!
//! This module provides the high-level API: resolve the checkpoints to
//! average, stream them through a [`RunningAverage`], and save the result.
//! Only the accumulator and the checkpoint currently being added are held in
//! memory.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::{
    Architecture, AverageConfig, AverageError, CheckpointLoader, CheckpointWriter, IterRange,
    OutputDtype, Result, RunningAverage, SafetensorsLoader, SafetensorsWriter,
};

/// Summary of a finished averaging run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AverageReport {
    /// Where the averaged checkpoint was written.
    pub output: PathBuf,
    /// Number of checkpoints averaged.
    pub checkpoints: usize,
    /// Number of parameters in the output.
    pub parameters: usize,
    /// Number of tensors in the output.
    pub tensors: usize,
}

/// Loads checkpoints, averages them and saves the result.
#[derive(Debug, Clone)]
pub struct AveragePipeline<L, W> {
    loader: L,
    writer: W,
}

impl<L: CheckpointLoader, W: CheckpointWriter> AveragePipeline<L, W> {
    /// Create a pipeline from a loader and a writer.
    pub fn new(loader: L, writer: W) -> Self {
        Self { loader, writer }
    }

    /// Average `files` in order and write the result to `output`.
    pub fn run(&self, files: &[PathBuf], output: &Path) -> Result<AverageReport> {
        self.run_with_progress(files, output, |_, _| {})
    }

    /// Like [`run`](Self::run), calling `on_loaded` after each checkpoint is accumulated.
    pub fn run_with_progress(
        &self,
        files: &[PathBuf],
        output: &Path,
        mut on_loaded: impl FnMut(usize, &Path),
    ) -> Result<AverageReport> {
        let (first, rest) = files.split_first().ok_or(AverageError::NotEnoughCheckpoints {
            expected: 1,
            actual: 0,
        })?;

        info!("Averaging {} checkpoints", files.len());

        let mut running = RunningAverage::new(self.load(first)?);
        on_loaded(0, first);

        for (idx, path) in rest.iter().enumerate() {
            let set = self.load(path)?;
            running.add(&set).inspect_err(|e| {
                error!("Checkpoint {:?} is incompatible: {}", path, e);
            })?;
            on_loaded(idx + 1, path);
        }

        let checkpoints = running.checkpoints();
        let averaged = running.finish()?;

        self.writer.save(&averaged, checkpoints, output)?;
        info!("Averaging complete! Output saved to: {:?}", output);

        Ok(AverageReport {
            output: output.to_path_buf(),
            checkpoints,
            parameters: averaged.len(),
            tensors: averaged.num_blobs(),
        })
    }

    fn load(&self, path: &Path) -> Result<crate::ParameterSet> {
        debug!("Loading checkpoint: {:?}", path);
        self.loader.load(path).inspect_err(|e| {
            error!("Failed to load {:?}: {}", path, e);
        })
    }
}

/// Build the safetensors pipeline described by `config`.
pub fn safetensors_pipeline(
    config: &AverageConfig,
) -> Result<AveragePipeline<SafetensorsLoader, SafetensorsWriter>> {
    let mut loader = SafetensorsLoader::new();
    if let Some(path) = &config.architecture {
        let architecture = Architecture::from_file(path)?;
        debug!(
            "Restricting to {} parameters from {:?}",
            architecture.parameters.len(),
            path
        );
        loader = loader.with_architecture(&architecture);
    }

    Ok(AveragePipeline::new(loader, SafetensorsWriter::new(config.dtype)))
}

/// Main entry point for averaging checkpoints described by a configuration.
///
/// Configuration errors are reported before any checkpoint is read.
pub fn run_average(config: &AverageConfig) -> Result<AverageReport> {
    config.validate()?;
    let files = config.checkpoint_files()?;
    let output = config.output_path()?;

    safetensors_pipeline(config)?.run(&files, output)
}

/// Builder for creating averaging configurations programmatically.
#[derive(Debug, Default)]
pub struct AverageBuilder {
    config: AverageConfig,
}

impl AverageBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an explicit checkpoint file.
    pub fn add_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.config
            .weight_files
            .get_or_insert_with(Vec::new)
            .push(path.into());
        self
    }

    /// Average `{prefix}_iter_{it}` checkpoints over `range`.
    pub fn prefix_range(mut self, prefix: impl Into<String>, range: IterRange) -> Self {
        self.config.weight_prefix = Some(prefix.into());
        self.config.iter_range = Some(range);
        self
    }

    /// Set the extension of prefix-generated checkpoint names.
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.config.extension = extension.into();
        self
    }

    /// Set the output path.
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output = Some(path.into());
        self
    }

    /// Set the output dtype.
    pub fn dtype(mut self, dtype: OutputDtype) -> Self {
        self.config.dtype = dtype;
        self
    }

    /// Restrict averaging to the parameters of an architecture file.
    pub fn architecture(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.architecture = Some(path.into());
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<AverageConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build and run the averaging.
    pub fn run(self) -> Result<AverageReport> {
        let config = self.build()?;
        run_average(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AveragedParameterSet, ParameterSet, Tensor};
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Serves parameter sets from memory, keyed by path.
    struct MemoryLoader {
        sets: HashMap<PathBuf, ParameterSet>,
        loads: RefCell<Vec<PathBuf>>,
    }

    impl MemoryLoader {
        fn new(entries: Vec<(&str, f32)>) -> Self {
            let sets = entries
                .into_iter()
                .map(|(path, value)| {
                    let mut set = ParameterSet::new();
                    set.insert_arrays("w", vec![Tensor::from_slice(&[value, value * 2.0])]);
                    (PathBuf::from(path), set)
                })
                .collect();
            Self {
                sets,
                loads: RefCell::new(Vec::new()),
            }
        }
    }

    impl CheckpointLoader for MemoryLoader {
        fn load(&self, path: &Path) -> Result<ParameterSet> {
            self.loads.borrow_mut().push(path.to_path_buf());
            self.sets
                .get(path)
                .cloned()
                .ok_or_else(|| AverageError::CheckpointLoad(format!("{:?} missing", path)))
        }
    }

    #[derive(Default)]
    struct MemoryWriter {
        saved: RefCell<Option<(AveragedParameterSet, usize, PathBuf)>>,
    }

    impl CheckpointWriter for MemoryWriter {
        fn save(&self, set: &AveragedParameterSet, checkpoints: usize, path: &Path) -> Result<()> {
            *self.saved.borrow_mut() = Some((set.clone(), checkpoints, path.to_path_buf()));
            Ok(())
        }
    }

    #[test]
    fn test_pipeline_averages_in_order() {
        let loader = MemoryLoader::new(vec![("a", 1.0), ("b", 2.0), ("c", 6.0)]);
        let pipeline = AveragePipeline::new(loader, MemoryWriter::default());
        let files: Vec<PathBuf> = ["a", "b", "c"].into_iter().map(PathBuf::from).collect();

        let mut seen = Vec::new();
        let report = pipeline
            .run_with_progress(&files, Path::new("out"), |idx, path| {
                seen.push((idx, path.to_path_buf()))
            })
            .unwrap();

        assert_eq!(report.checkpoints, 3);
        assert_eq!(report.parameters, 1);
        assert_eq!(report.tensors, 1);
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], (2, PathBuf::from("c")));
        assert_eq!(*pipeline.loader.loads.borrow(), files);

        let saved = pipeline.writer.saved.borrow();
        let (set, checkpoints, path) = saved.as_ref().unwrap();
        assert_eq!(*checkpoints, 3);
        assert_eq!(path, &PathBuf::from("out"));
        assert_eq!(set.get("w").unwrap()[0].data.as_slice(), &[3.0, 6.0]);
    }

    #[test]
    fn test_pipeline_stops_on_load_error() {
        let loader = MemoryLoader::new(vec![("a", 1.0)]);
        let pipeline = AveragePipeline::new(loader, MemoryWriter::default());
        let files = vec![PathBuf::from("a"), PathBuf::from("missing")];

        let err = pipeline.run(&files, Path::new("out")).unwrap_err();
        assert!(matches!(err, AverageError::CheckpointLoad(_)));
        assert!(pipeline.writer.saved.borrow().is_none());
    }

    #[test]
    fn test_pipeline_requires_checkpoints() {
        let pipeline = AveragePipeline::new(MemoryLoader::new(vec![]), MemoryWriter::default());
        let err = pipeline.run(&[], Path::new("out")).unwrap_err();
        assert!(matches!(err, AverageError::NotEnoughCheckpoints { .. }));
    }

    #[test]
    fn test_run_average_rejects_config_before_loading() {
        let config = AverageConfig {
            weight_prefix: Some("snap".to_string()),
            output: Some(PathBuf::from("out.safetensors")),
            ..Default::default()
        };

        let err = run_average(&config).unwrap_err();
        assert!(matches!(err, AverageError::InvalidConfig(_)));
    }

    #[test]
    fn test_builder() {
        let config = AverageBuilder::new()
            .add_checkpoint("a.safetensors")
            .add_checkpoint("b.safetensors")
            .output("avg.safetensors")
            .dtype(OutputDtype::Bfloat16)
            .build()
            .unwrap();

        assert_eq!(config.weight_files.as_ref().unwrap().len(), 2);
        assert_eq!(config.dtype, OutputDtype::Bfloat16);
    }

    #[test]
    fn test_builder_prefix_range() {
        let config = AverageBuilder::new()
            .prefix_range("run/net", IterRange::new(10, 30, 10).unwrap())
            .extension("st")
            .output("avg.st")
            .build()
            .unwrap();

        assert_eq!(
            config.checkpoint_files().unwrap(),
            vec![
                PathBuf::from("run/net_iter_10.st"),
                PathBuf::from("run/net_iter_20.st")
            ]
        );
    }

    #[test]
    fn test_builder_requires_sources() {
        let result = AverageBuilder::new().output("avg.safetensors").build();
        assert!(result.is_err());
    }
}
