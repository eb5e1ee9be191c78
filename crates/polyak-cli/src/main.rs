//! Polyak CLI - average the weights of training checkpoints.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use polyak_merge::{safetensors_pipeline, AverageConfig, IterRange, OutputDtype};

/// Output dtype for the averaged checkpoint.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum DtypeArg {
    /// Keep the dtype of each tensor in the first checkpoint
    #[default]
    Preserve,
    /// 32-bit float
    Float32,
    /// IEEE half precision
    Float16,
    /// Brain float
    Bfloat16,
}

impl From<DtypeArg> for OutputDtype {
    fn from(arg: DtypeArg) -> Self {
        match arg {
            DtypeArg::Preserve => OutputDtype::Preserve,
            DtypeArg::Float32 => OutputDtype::Float32,
            DtypeArg::Float16 => OutputDtype::Float16,
            DtypeArg::Bfloat16 => OutputDtype::Bfloat16,
        }
    }
}

#[derive(Parser)]
#[command(name = "polyak")]
#[command(author, version, about = "Polyak averaging of training checkpoints", long_about = None)]
struct Cli {
    /// Path for saving the averaged checkpoint
    output: Option<PathBuf>,

    /// Averaging configuration file (YAML); flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Checkpoint files to average, in order
    #[arg(long, num_args = 1..)]
    weight_files: Option<Vec<PathBuf>>,

    /// Checkpoint prefix; files are named {prefix}_iter_{it}.{extension}
    #[arg(long)]
    weight_prefix: Option<String>,

    /// Iteration range for the prefix, "(begin, end, step)" with end exclusive
    #[arg(long, allow_hyphen_values = true)]
    iter_range: Option<IterRange>,

    /// Extension of prefix-generated checkpoint files
    #[arg(long)]
    extension: Option<String>,

    /// Architecture file (YAML or JSON) listing the parameters to average
    #[arg(short, long)]
    architecture: Option<PathBuf>,

    /// Output dtype
    #[arg(long, value_enum)]
    dtype: Option<DtypeArg>,

    /// Print the resolved checkpoint list and exit
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    /// Merge flags over the optional configuration file.
    fn into_config(self) -> anyhow::Result<(AverageConfig, bool)> {
        let mut config = match &self.config {
            Some(path) => AverageConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to read config {:?}", path))?,
            None => AverageConfig::default(),
        };

        if let Some(files) = self.weight_files {
            config.weight_files = Some(files);
        }
        if let Some(prefix) = self.weight_prefix {
            config.weight_prefix = Some(prefix);
        }
        if let Some(range) = self.iter_range {
            config.iter_range = Some(range);
        }
        if let Some(extension) = self.extension {
            config.extension = extension;
        }
        if let Some(output) = self.output {
            config.output = Some(output);
        }
        if let Some(architecture) = self.architecture {
            config.architecture = Some(architecture);
        }
        if let Some(dtype) = self.dtype {
            config.dtype = dtype.into();
        }

        Ok((config, self.dry_run))
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let (config, dry_run) = Cli::parse().into_config()?;
    let files = config.checkpoint_files()?;

    if dry_run {
        for file in &files {
            println!("{}", file.display());
        }
        return Ok(());
    }

    config.validate()?;
    let output = config.output_path()?;

    tracing::info!(
        checkpoints = files.len(),
        output = %output.display(),
        dtype = ?config.dtype,
        "Starting Polyak averaging"
    );

    let progress = ProgressBar::new(files.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let pipeline = safetensors_pipeline(&config)?;
    let report = pipeline.run_with_progress(&files, output, |_, path| {
        progress.set_message(path.display().to_string());
        progress.inc(1);
    });
    progress.finish_and_clear();
    let report = report?;

    println!(
        "Averaged {} checkpoints ({} parameters, {} tensors) into {}",
        report.checkpoints,
        report.parameters,
        report.tensors,
        report.output.display()
    );

    Ok(())
}
