//! Segment error types.

use thiserror::Error;

/// Errors from the table segment.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("record must be a JSON object")]
    NotAnObject,

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("field '{field}' expects {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("table '{0}' has no primary key")]
    NoPrimaryKey(String),

    #[error("duplicate primary key: {0}")]
    DuplicateKey(String),

    #[error("primary key not found: {0}")]
    KeyNotFound(String),

    #[error("data corruption: {0}")]
    Corruption(String),
}
