//! # tablewal-wal
//!
//! Write-ahead log for a single table segment.
//!
//! This crate provides:
//! - Line-oriented log files named by their creation second
//! - Time-based rotation, checked on each write
//! - A global sequence counter persisted in a sidecar file
//! - Idempotent replay into a [`TableSegmentSink`] above its watermark
//! - Age-based retention
//!
//! Replay and retention never abort on bad data; every problem is logged and
//! returned as a [`WalDiagnostic`].

pub mod counter;
pub mod diagnostic;
pub mod entry;
pub mod error;
pub mod logfile;
pub mod replay;
pub mod retention;
pub mod sink;
pub mod wal;

pub use counter::{MonotonicCounter, COUNTER_FILE_NAME};
pub use diagnostic::{DiagnosticKind, WalDiagnostic};
pub use entry::{EntryKind, LogEntry};
pub use error::WalError;
pub use logfile::{LogFileInfo, LogFileScanner};
pub use replay::ReplayReport;
pub use retention::RetentionReport;
pub use sink::TableSegmentSink;
pub use wal::{
    FsyncPolicy, TableId, WalConfig, WalStats, WriteAheadLog, DEFAULT_RETENTION,
    DEFAULT_ROTATION_INTERVAL,
};
