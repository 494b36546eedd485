pub mod loess;
pub mod stats;
pub mod svd;
