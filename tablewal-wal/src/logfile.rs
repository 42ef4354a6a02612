//! Log file management.
//!
//! A table's log is split into files named by the epoch second at which they
//! were opened (`<epoch_seconds>.log`):
//! - Rotation: a new file once the rotation interval has elapsed
//! - Replay: files are read oldest first, line by line
//! - Retention: expired files are deleted oldest first

use crate::entry::LogEntry;
use crate::error::WalError;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Log file extension.
pub const LOG_FILE_EXTENSION: &str = "log";

/// Log file name format: `<epoch_seconds>.log`.
pub fn log_file_name(created_at: i64) -> String {
    format!("{}.{}", created_at, LOG_FILE_EXTENSION)
}

/// Parses the creation timestamp from a log file name.
pub fn parse_log_file_name(name: &str) -> Option<i64> {
    let stem = name.strip_suffix(".log")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// A log file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileInfo {
    /// Epoch seconds encoded in the file name.
    pub created_at: i64,
    pub path: PathBuf,
}

/// The file currently open for appends.
pub struct LogFile {
    path: PathBuf,
    writer: BufWriter<File>,
    sync_pending: bool,
}

impl LogFile {
    /// Opens `<dir>/<created_at>.log` for appending, creating it if needed.
    ///
    /// Two rotations within the same second land in the same file. If that
    /// file ends in a torn line (a crash mid-append), the line is terminated
    /// first so the next entry starts on a line of its own.
    pub fn open(dir: &Path, created_at: i64) -> Result<Self, WalError> {
        let path = dir.join(log_file_name(created_at));
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut sync_pending = false;
        if ends_mid_line(&mut file)? {
            tracing::warn!(
                "Log file {} ends in a partial line, terminating it",
                path.display()
            );
            file.write_all(b"\n")?;
            sync_pending = true;
        }

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            sync_pending,
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends an encoded line and hands it to the OS.
    ///
    /// The data survives a process crash once this returns, but not a power
    /// failure until [`LogFile::sync`] is called.
    pub fn append(&mut self, line: &[u8]) -> Result<(), WalError> {
        self.writer
            .write_all(line)
            .and_then(|_| self.writer.flush())
            .map_err(|source| WalError::Append {
                path: self.path.clone(),
                source,
            })?;
        self.sync_pending = true;
        Ok(())
    }

    /// Syncs the file to stable storage.
    pub fn sync(&mut self) -> Result<bool, WalError> {
        if self.sync_pending {
            self.writer.flush()?;
            self.writer.get_ref().sync_data()?;
            self.sync_pending = false;
            return Ok(true);
        }
        Ok(false)
    }

    /// Flushes and closes the file.
    pub fn close(mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        Ok(())
    }
}

fn ends_mid_line(file: &mut File) -> Result<bool, WalError> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Log directory scanner.
pub struct LogFileScanner;

impl LogFileScanner {
    /// Lists all log files in a directory, oldest first.
    ///
    /// Entries that are not `<digits>.log` (the counter sidecar, temp files)
    /// are ignored.
    pub fn list(dir: &Path) -> Result<Vec<LogFileInfo>, WalError> {
        let mut files = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(created_at) = parse_log_file_name(&name) {
                files.push(LogFileInfo {
                    created_at,
                    path: entry.path(),
                });
            }
        }

        files.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(files)
    }
}

/// Line-by-line reader over one log file.
///
/// Yields `(line_number, entry)` pairs. Lines that fail to parse come back as
/// errors and reading continues with the next line; an I/O error ends the
/// iteration.
pub struct LogFileReader {
    reader: BufReader<File>,
    line: usize,
    buf: Vec<u8>,
    done: bool,
}

impl LogFileReader {
    pub fn open(path: &Path) -> Result<Self, WalError> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            line: 0,
            buf: Vec::new(),
            done: false,
        })
    }
}

impl Iterator for LogFileReader {
    type Item = (usize, Result<LogEntry, WalError>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                self.line += 1;
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                }
                let parsed = match std::str::from_utf8(&self.buf) {
                    Ok(text) => LogEntry::parse(text),
                    Err(e) => Err(WalError::invalid_entry(
                        None,
                        format!("line is not valid UTF-8: {}", e),
                    )),
                };
                Some((self.line, parsed))
            }
            Err(e) => {
                self.done = true;
                Some((self.line + 1, Err(e.into())))
            }
        }
    }
}
