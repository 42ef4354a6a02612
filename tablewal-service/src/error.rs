//! Service error types.

use crate::config::ConfigError;
use thiserror::Error;

/// Service errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("WAL error: {0}")]
    Wal(#[from] tablewal_wal::WalError),

    #[error("segment error: {0}")]
    Segment(#[from] tablewal_segment::SegmentError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("checkpoint of table {0} was written with a different schema")]
    SchemaMismatch(u64),
}

impl ServiceError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Wal(e) => e.is_retryable(),
            _ => false,
        }
    }
}
