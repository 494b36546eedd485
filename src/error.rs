use thiserror::Error;

/// Error type covering every failure mode of the preprocessing pipeline.
///
/// Each stage validates its preconditions before computing and surfaces the
/// first violation to the caller; nothing proceeds on degenerate input.
#[derive(Error, Debug)]
pub enum ScError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("format error: {0}")]
    Format(String),

    #[error("empty result: {0}")]
    EmptyResult(String),

    #[error("cell '{0}' has zero total counts")]
    DegenerateCell(String),

    #[error("rank deficiency: requested {requested} components, matrix supports at most {available}")]
    RankDeficiency { requested: usize, available: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, ScError>;
