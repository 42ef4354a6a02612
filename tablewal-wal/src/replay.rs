//! Replay of logged entries into a table segment.
//!
//! Handles:
//! - Entries already durable in the segment (skipped)
//! - Malformed lines and payloads (reported, skipped)
//! - Entries the segment rejects (reported, skipped)
//! - Files made redundant by the segment's watermark (deleted)

use crate::diagnostic::{report, DiagnosticKind, WalDiagnostic};
use crate::entry::{EntryKind, LogEntry};
use crate::error::WalError;
use crate::logfile::{LogFileInfo, LogFileReader, LogFileScanner};
use crate::sink::TableSegmentSink;
use crate::wal::WriteAheadLog;
use std::path::{Path, PathBuf};

/// Result of a replay pass.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    /// Segment watermark read before replay started.
    pub watermark: u64,
    pub files_scanned: usize,
    /// Lines read, including unparsable ones.
    pub lines_read: u64,
    pub entries_applied: u64,
    /// Entries at or below the watermark.
    pub entries_skipped: u64,
    /// Entries above the watermark that could not be applied.
    pub entries_failed: u64,
    /// Highest sequence number among parsed entries.
    pub max_sequence: u64,
    /// Counter value after replay.
    pub counter: u64,
    /// Fully consumed files that were deleted.
    pub files_removed: Vec<PathBuf>,
    pub diagnostics: Vec<WalDiagnostic>,
}

impl ReplayReport {
    /// True if replay ran without a single diagnostic.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Diagnostics of one kind.
    pub fn diagnostics_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &WalDiagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }
}

/// What replaying one file produced.
struct FileOutcome {
    /// At least one entry above the watermark was handed to the segment.
    attempted: bool,
    /// Every line was read and parsed.
    clean: bool,
}

impl WriteAheadLog {
    /// Applies every logged entry newer than the segment's watermark.
    ///
    /// Files are read oldest first. The counter is raised to the highest
    /// sequence seen (and to the watermark), files whose entries were all
    /// already durable are deleted, and the counter is persisted. Nothing
    /// here aborts: problems are logged and returned in the report.
    ///
    /// Holds the write lock for the whole pass.
    pub fn replay<S>(&self, schema: &S::Schema, segment: &S) -> ReplayReport
    where
        S: TableSegmentSink + ?Sized,
    {
        let active = self.active.lock();
        let active_path = active.path().map(Path::to_path_buf);

        let watermark = segment.wal_global_id();
        let mut result = ReplayReport {
            watermark,
            ..Default::default()
        };

        let files = match LogFileScanner::list(&self.logs_dir) {
            Ok(files) => files,
            Err(e) => {
                report(
                    &mut result.diagnostics,
                    WalDiagnostic::new(DiagnosticKind::ListFiles, &self.logs_dir, e),
                );
                Vec::new()
            }
        };

        let last = files.len().saturating_sub(1);
        for (index, info) in files.iter().enumerate() {
            let outcome = self.replay_file(info, schema, segment, watermark, &mut result);
            result.files_scanned += 1;

            let is_latest = index == last;
            let is_active = active_path.as_deref() == Some(info.path.as_path());
            if outcome.attempted || !outcome.clean || is_latest || is_active {
                continue;
            }

            match std::fs::remove_file(&info.path) {
                Ok(()) => {
                    tracing::debug!("Removed fully replayed log file {}", info.path.display());
                    result.files_removed.push(info.path.clone());
                }
                Err(e) => report(
                    &mut result.diagnostics,
                    WalDiagnostic::new(DiagnosticKind::RemoveFile, &info.path, e),
                ),
            }
        }

        self.counter.advance_to(watermark);
        result.counter = self.counter.get();
        if let Err(e) = self.persist_counter() {
            report(
                &mut result.diagnostics,
                WalDiagnostic::new(DiagnosticKind::PersistCounter, &self.counter_path, e),
            );
        }

        tracing::info!(
            "WAL replay for table {} complete: {} files, {} applied, {} skipped, {} failed, {} files removed, counter={}",
            self.config.table_id,
            result.files_scanned,
            result.entries_applied,
            result.entries_skipped,
            result.entries_failed,
            result.files_removed.len(),
            result.counter
        );

        drop(active);
        result
    }

    fn replay_file<S>(
        &self,
        info: &LogFileInfo,
        schema: &S::Schema,
        segment: &S,
        watermark: u64,
        result: &mut ReplayReport,
    ) -> FileOutcome
    where
        S: TableSegmentSink + ?Sized,
    {
        let mut outcome = FileOutcome {
            attempted: false,
            clean: true,
        };

        let reader = match LogFileReader::open(&info.path) {
            Ok(reader) => reader,
            Err(e) => {
                report(
                    &mut result.diagnostics,
                    WalDiagnostic::new(DiagnosticKind::ReadFile, &info.path, e),
                );
                outcome.clean = false;
                return outcome;
            }
        };

        for (line, parsed) in reader {
            result.lines_read += 1;

            let entry = match parsed {
                Ok(entry) => entry,
                // A sequence read from a line that does not parse is not
                // trusted to move the counter.
                Err(WalError::InvalidEntry { sequence, reason }) => {
                    report(
                        &mut result.diagnostics,
                        WalDiagnostic::new(DiagnosticKind::Parse, &info.path, reason)
                            .at_line(line)
                            .with_sequence(sequence),
                    );
                    outcome.clean = false;
                    continue;
                }
                Err(e) => {
                    report(
                        &mut result.diagnostics,
                        WalDiagnostic::new(DiagnosticKind::ReadFile, &info.path, e).at_line(line),
                    );
                    outcome.clean = false;
                    continue;
                }
            };

            self.observe(entry.sequence, result);
            if entry.sequence <= watermark {
                result.entries_skipped += 1;
                continue;
            }

            outcome.attempted = true;
            match apply_entry(schema, segment, &entry) {
                Ok(()) => result.entries_applied += 1,
                Err((kind, message)) => {
                    result.entries_failed += 1;
                    report(
                        &mut result.diagnostics,
                        WalDiagnostic::new(kind, &info.path, message)
                            .at_line(line)
                            .with_sequence(Some(entry.sequence)),
                    );
                }
            }
        }

        outcome
    }

    fn observe(&self, sequence: u64, result: &mut ReplayReport) {
        self.counter.advance_to(sequence);
        result.max_sequence = result.max_sequence.max(sequence);
    }
}

fn apply_entry<S>(
    schema: &S::Schema,
    segment: &S,
    entry: &LogEntry,
) -> Result<(), (DiagnosticKind, String)>
where
    S: TableSegmentSink + ?Sized,
{
    let record = entry
        .record()
        .map_err(|e| (DiagnosticKind::Payload, e.to_string()))?;

    let applied = match entry.kind {
        EntryKind::Insert => segment.insert(schema, &record, entry.sequence),
        EntryKind::Delete => segment.delete_by_pk(&record, entry.sequence),
    };
    applied.map_err(|e| {
        (
            DiagnosticKind::Apply,
            format!("failed to apply {}: {}", entry.kind, e),
        )
    })
}
