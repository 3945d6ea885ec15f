//! Error types for masking, metrics and checkpoint handling

use pyo3::exceptions::{PyFileExistsError, PyFileNotFoundError, PyOSError, PyValueError};
use pyo3::PyErr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MlmError {
    /// A required argument or setting is missing or out of range.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Token id {0} is not part of the vocabulary")]
    InvalidToken(u32),

    #[error("Label {label} is outside the vocabulary of {num_classes} classes")]
    InvalidLabel { label: i64, num_classes: usize },

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MlmError {
    pub fn config(msg: impl Into<String>) -> Self {
        MlmError::Config(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        MlmError::InvalidArgument(msg.into())
    }

    pub fn shape_mismatch(expected: impl std::fmt::Debug, actual: impl std::fmt::Debug) -> Self {
        MlmError::ShapeMismatch {
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}

pub type Result<T> = std::result::Result<T, MlmError>;

impl From<MlmError> for PyErr {
    fn from(err: MlmError) -> PyErr {
        match err {
            MlmError::NotFound(_) => PyFileNotFoundError::new_err(err.to_string()),
            MlmError::AlreadyExists(_) => PyFileExistsError::new_err(err.to_string()),
            MlmError::Io(_) => PyOSError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}
