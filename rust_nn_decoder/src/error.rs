//! Error type shared by every operator in the crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecoderError {
    /// Two tensors (or a tensor and an operator) disagree on a dimension.
    #[error("shape mismatch in {op}: expected {expected}, found {found}")]
    ShapeMismatch {
        op: &'static str,
        expected: String,
        found: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DecoderError {
    pub(crate) fn shape(op: &'static str, expected: impl ToString, found: impl ToString) -> Self {
        DecoderError::ShapeMismatch {
            op,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DecoderError>;
