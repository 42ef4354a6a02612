//! Global sequence counter and its sidecar file.

use crate::error::WalError;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sidecar file holding the last known counter value.
pub const COUNTER_FILE_NAME: &str = "last_id.txt";

/// Thread-safe monotonically increasing 64-bit counter.
#[derive(Debug, Default)]
pub struct MonotonicCounter {
    value: AtomicU64,
}

impl MonotonicCounter {
    pub fn new(value: u64) -> Self {
        Self {
            value: AtomicU64::new(value),
        }
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Increments and returns the new value. Fails without wrapping once
    /// the counter is at `u64::MAX`.
    pub fn increment_and_get(&self) -> Result<u64, WalError> {
        self.value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1))
            .map(|prev| prev + 1)
            .map_err(WalError::SequenceExhausted)
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Raises the counter to `value` if it is currently lower.
    /// Returns the value after the update.
    pub fn advance_to(&self, value: u64) -> u64 {
        self.value.fetch_max(value, Ordering::SeqCst).max(value)
    }
}

/// Reads the sidecar. `Ok(None)` if it does not exist.
pub fn load_counter(path: &Path) -> Result<Option<u64>, WalError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let trimmed = content.trim();
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| WalError::InvalidCounter {
            path: path.to_path_buf(),
            reason: format!("not a counter value: {:?}", trimmed),
        })
}

/// Writes the sidecar through a temp file and rename.
pub fn store_counter(path: &Path, value: u64) -> Result<(), WalError> {
    let tmp = path.with_extension("txt.tmp");
    std::fs::write(&tmp, value.to_string())?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
