//! Error types for Gradiente

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Index {index} out of range for tensor of {len} elements")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Non-positive spatial output extent: {height}x{width}")]
    InvalidOutputExtent { height: isize, width: isize },

    #[error("Tensor is inference-only: {0}")]
    InferenceOnly(&'static str),

    #[error("Invalid gradient: {0}")]
    InvalidGradient(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
