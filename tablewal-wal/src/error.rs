//! WAL error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to create log directory '{}': {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to append to log file '{}': {source}", path.display())]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log entry: {reason}")]
    InvalidEntry {
        /// Sequence number, if the line got far enough to carry one.
        sequence: Option<u64>,
        reason: String,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid counter file '{}': {reason}", path.display())]
    InvalidCounter { path: PathBuf, reason: String },

    #[error("WAL is closed")]
    Closed,

    #[error("sequence numbers exhausted at {0}")]
    SequenceExhausted(u64),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WalError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalError::Io(_) | WalError::Append { .. })
    }

    pub(crate) fn invalid_entry(sequence: Option<u64>, reason: impl Into<String>) -> Self {
        WalError::InvalidEntry {
            sequence,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        let io = WalError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(io.is_retryable());

        let append = WalError::Append {
            path: PathBuf::from("/tmp/1.log"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "full"),
        };
        assert!(append.is_retryable());

        assert!(!WalError::Closed.is_retryable());
        assert!(!WalError::SequenceExhausted(u64::MAX).is_retryable());
        assert!(!WalError::invalid_entry(Some(3), "bad kind").is_retryable());
    }

    #[test]
    fn test_display_includes_path() {
        let err = WalError::CreateDirectory {
            path: PathBuf::from("/data/7/wal"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/data/7/wal"));
        assert!(msg.contains("denied"));
    }
}
