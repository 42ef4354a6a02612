//! Age-based deletion of log files.

use crate::diagnostic::{report, DiagnosticKind, WalDiagnostic};
use crate::error::WalError;
use crate::logfile::{LogFileReader, LogFileScanner};
use crate::wal::WriteAheadLog;
use std::path::{Path, PathBuf};

/// Result of a retention pass.
#[derive(Debug, Clone, Default)]
pub struct RetentionReport {
    pub files_scanned: usize,
    pub files_removed: Vec<PathBuf>,
    /// The active file was expired but kept.
    pub skipped_active: bool,
    /// Expired file kept because it holds entries above the durable
    /// watermark. The scan stops there.
    pub held_by_watermark: Option<PathBuf>,
    pub diagnostics: Vec<WalDiagnostic>,
}

impl RetentionReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

impl WriteAheadLog {
    /// Deletes log files older than the retention window.
    pub fn cleanup_old_files(&self) -> RetentionReport {
        self.cleanup_old_files_at(chrono::Utc::now().timestamp())
    }

    /// Like [`cleanup_old_files`](Self::cleanup_old_files), but only deletes
    /// files whose entries are all at or below `watermark`, the highest
    /// sequence the segment has made durable.
    pub fn cleanup_old_files_below(&self, watermark: u64) -> RetentionReport {
        self.cleanup_old_files_below_at(chrono::Utc::now().timestamp(), watermark)
    }

    /// Deletes log files whose creation time is more than the retention window
    /// before `now` (epoch seconds).
    ///
    /// Files are visited oldest first and the scan stops at the first file that
    /// has not expired. The file open for appends is never deleted. Removal
    /// failures are reported and the scan moves on.
    pub fn cleanup_old_files_at(&self, now: i64) -> RetentionReport {
        self.cleanup(now, None)
    }

    /// [`cleanup_old_files_at`](Self::cleanup_old_files_at) bounded by a
    /// durable watermark. The scan also stops at the first expired file
    /// holding an entry above `watermark`, or one that cannot be read.
    pub fn cleanup_old_files_below_at(&self, now: i64, watermark: u64) -> RetentionReport {
        self.cleanup(now, Some(watermark))
    }

    fn cleanup(&self, now: i64, watermark: Option<u64>) -> RetentionReport {
        let active = self.active.lock();
        let active_path = active.path().map(Path::to_path_buf);
        let retention = i64::try_from(self.config.retention.as_secs()).unwrap_or(i64::MAX);

        let mut result = RetentionReport::default();
        let files = match LogFileScanner::list(&self.logs_dir) {
            Ok(files) => files,
            Err(e) => {
                report(
                    &mut result.diagnostics,
                    WalDiagnostic::new(DiagnosticKind::ListFiles, &self.logs_dir, e),
                );
                return result;
            }
        };

        for info in &files {
            result.files_scanned += 1;
            if now.saturating_sub(info.created_at) <= retention {
                break;
            }
            if active_path.as_deref() == Some(info.path.as_path()) {
                result.skipped_active = true;
                continue;
            }
            if let Some(watermark) = watermark {
                match highest_sequence(&info.path) {
                    Ok(highest) if highest <= watermark => {}
                    Ok(highest) => {
                        tracing::debug!(
                            "Keeping expired log file {}: entry {} is above watermark {}",
                            info.path.display(),
                            highest,
                            watermark
                        );
                        result.held_by_watermark = Some(info.path.clone());
                        break;
                    }
                    Err(e) => {
                        report(
                            &mut result.diagnostics,
                            WalDiagnostic::new(DiagnosticKind::ReadFile, &info.path, e),
                        );
                        result.held_by_watermark = Some(info.path.clone());
                        break;
                    }
                }
            }

            match std::fs::remove_file(&info.path) {
                Ok(()) => {
                    tracing::debug!("Removed expired log file {}", info.path.display());
                    result.files_removed.push(info.path.clone());
                }
                Err(e) => report(
                    &mut result.diagnostics,
                    WalDiagnostic::new(DiagnosticKind::RemoveFile, &info.path, e),
                ),
            }
        }

        if !result.files_removed.is_empty() {
            tracing::info!(
                "WAL retention for table {}: removed {} of {} log files",
                self.config.table_id,
                result.files_removed.len(),
                files.len()
            );
        }

        drop(active);
        result
    }
}

/// Highest sequence among the parsed entries of a file. Lines that do not
/// parse cannot be replayed and are ignored.
fn highest_sequence(path: &Path) -> Result<u64, WalError> {
    let mut highest = 0;
    for (_, parsed) in LogFileReader::open(path)? {
        match parsed {
            Ok(entry) => highest = highest.max(entry.sequence),
            Err(WalError::InvalidEntry { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(highest)
}
