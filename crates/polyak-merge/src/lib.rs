//! Polyak averaging of neural-network checkpoints.
//!
//! This crate averages the trainable parameters of several checkpoints taken
//! from one training run. Every parameter of the first checkpoint is averaged
//! elementwise over the checkpoints that contain it, and the result is
//! written as a new checkpoint.
//!
//! # Layers
//!
//! - [`average`] / [`RunningAverage`]: the averaging algorithm, generic over
//!   any array type implementing [`ParamArray`]
//! - [`checkpoint_paths`]: `{prefix}_iter_{it}` checkpoint naming
//! - [`SafetensorsLoader`] / [`SafetensorsWriter`]: checkpoint I/O
//! - [`run_average`]: configuration-driven end-to-end run
//!
//! # Example
//!
//! ```ignore
//! use polyak_merge::{AverageBuilder, IterRange};
//!
//! let report = AverageBuilder::new()
//!     .prefix_range("snapshots/net", IterRange::new(10_000, 50_001, 10_000)?)
//!     .output("net_polyak.safetensors")
//!     .run()?;
//! ```

#![warn(missing_docs)]

mod averager;
mod config;
mod error;
mod loader;
pub mod naming;
mod params;
mod pipeline;
mod tensor;
mod writer;

pub use averager::*;
pub use config::*;
pub use error::*;
pub use loader::*;
pub use naming::{checkpoint_paths, checkpoint_paths_with_extension, IterRange};
pub use params::*;
pub use pipeline::*;
pub use tensor::*;
pub use writer::*;
