//! Crate-wide error type.
//!
//! Every public operation returns `Result<_, PipelineError>`; none of
//! them panic or unwind across the public boundary (spec.md §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("initialisation failed: {0}")]
    Init(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("sink error: {0}")]
    Sink(String),

    #[error("memory allocation failed: {0}")]
    Memory(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
