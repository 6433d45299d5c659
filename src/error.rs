//! Error types shared by the codecs, losses and heads.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoseError {
    #[error("shape mismatch in {op}: expected {expected}, got {actual}")]
    Shape {
        op: &'static str,
        expected: String,
        actual: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{op} received an empty {what}")]
    Empty { op: &'static str, what: &'static str },

    #[error("tensor data error: {0}")]
    TensorData(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T, E = PoseError> = std::result::Result<T, E>;

impl PoseError {
    pub(crate) fn shape(op: &'static str, expected: impl ToString, actual: impl ToString) -> Self {
        PoseError::Shape {
            op,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl From<serde_json::Error> for PoseError {
    fn from(e: serde_json::Error) -> Self {
        PoseError::Serialization(e.to_string())
    }
}
