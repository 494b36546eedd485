//! The preprocessing stages, strictly ordered: QC metrics, cell filtering,
//! log-normalisation, variable feature selection, scaling, PCA and the
//! JackStraw significance test. Each stage takes an immutable input and
//! produces a new derived artifact; nothing is mutated in place.

pub mod dataset;
pub mod hvg;
pub mod jackstraw;
pub mod normalize;
pub mod pca;
pub mod qc;
pub mod runner;
pub mod scale;
