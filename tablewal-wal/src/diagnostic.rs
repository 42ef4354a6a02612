//! Non-fatal problems found during replay and retention.

use std::path::{Path, PathBuf};

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// The log directory could not be listed.
    ListFiles,
    /// A log file could not be opened or read to the end.
    ReadFile,
    /// A line did not match `<sequence> <kind> <payload>`.
    Parse,
    /// The payload was not valid JSON.
    Payload,
    /// The segment rejected the entry.
    Apply,
    /// A redundant or expired file could not be deleted.
    RemoveFile,
    /// The counter sidecar could not be written.
    PersistCounter,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::ListFiles => "list_files",
            DiagnosticKind::ReadFile => "read_file",
            DiagnosticKind::Parse => "parse",
            DiagnosticKind::Payload => "payload",
            DiagnosticKind::Apply => "apply",
            DiagnosticKind::RemoveFile => "remove_file",
            DiagnosticKind::PersistCounter => "persist_counter",
        }
    }
}

/// A problem that was reported and stepped over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalDiagnostic {
    pub kind: DiagnosticKind,
    /// File (or directory) the problem belongs to.
    pub path: PathBuf,
    /// 1-based line number within the file.
    pub line: Option<usize>,
    pub sequence: Option<u64>,
    pub message: String,
}

impl WalDiagnostic {
    pub fn new(kind: DiagnosticKind, path: &Path, message: impl ToString) -> Self {
        Self {
            kind,
            path: path.to_path_buf(),
            line: None,
            sequence: None,
            message: message.to_string(),
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_sequence(mut self, sequence: Option<u64>) -> Self {
        self.sequence = sequence;
        self
    }
}

impl std::fmt::Display for WalDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.path.display())?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
        }
        if let Some(sequence) = self.sequence {
            write!(f, " (entry {})", sequence)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Logs the diagnostic and appends it to `list`.
pub(crate) fn report(list: &mut Vec<WalDiagnostic>, diagnostic: WalDiagnostic) {
    tracing::warn!("WAL: {}", diagnostic);
    list.push(diagnostic);
}
