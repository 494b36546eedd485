//! Quality control and preprocessing for single-cell RNA-seq count
//! matrices: loading 10x-style directories, per-cell QC metrics and
//! filtering, log-normalisation, variable feature selection (vst), scaling
//! with optional covariate regression, PCA and JackStraw component
//! significance testing.

pub mod core;
pub mod error;
pub mod pipeline;
pub mod utils;

pub use crate::core::data::mtx::read_10x_dir;
pub use crate::error::{Result, ScError};
pub use crate::pipeline::dataset::{Artifact, Dataset};
pub use crate::pipeline::runner::Preprocess;
