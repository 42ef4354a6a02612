//! Main WAL implementation.

use crate::counter::{load_counter, store_counter, MonotonicCounter, COUNTER_FILE_NAME};
use crate::entry::{encode_line, validate_payload, EntryKind};
use crate::error::WalError;
use crate::logfile::{LogFile, LogFileInfo, LogFileScanner};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Table identifier; each table gets its own log directory.
pub type TableId = u64;

/// Default time between log file rotations.
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(600);

/// Default age after which a log file is deleted by retention.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Fsync policy for WAL writes.
///
/// Every write is flushed to the OS regardless of policy, so a process crash
/// never loses an acknowledged entry. The policy only controls how often the
/// data is forced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsyncPolicy {
    /// Never fsync automatically (caller may call sync).
    #[default]
    Never,
    /// Fsync after every write (safest, slowest).
    EveryWrite,
    /// Fsync after N writes.
    EveryN(u32),
}

/// WAL configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Root under which every table keeps `<table_id>/wal/`.
    pub base_path: PathBuf,
    pub table_id: TableId,
    /// Minimum age of the active file before the next write rotates it.
    pub rotation_interval: Duration,
    /// Files older than this are removed by `cleanup_old_files`.
    pub retention: Duration,
    pub fsync_policy: FsyncPolicy,
    /// Whether writes are logged at all.
    pub enabled: bool,
}

impl WalConfig {
    pub fn new(base_path: impl Into<PathBuf>, table_id: TableId) -> Self {
        Self {
            base_path: base_path.into(),
            table_id,
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
            retention: DEFAULT_RETENTION,
            fsync_policy: FsyncPolicy::default(),
            enabled: true,
        }
    }

    pub fn with_rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation_interval = interval;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_fsync_policy(mut self, policy: FsyncPolicy) -> Self {
        self.fsync_policy = policy;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns `base_path/<table_id>/wal`.
    pub fn logs_dir(&self) -> PathBuf {
        self.base_path.join(self.table_id.to_string()).join("wal")
    }
}

/// I/O statistics for the WAL.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalStats {
    /// Total bytes appended.
    pub bytes_written: u64,
    /// Total entries appended.
    pub writes: u64,
    /// Writes that returned without logging because the WAL was disabled.
    pub bypassed: u64,
    /// Log files opened, including the one opened at construction.
    pub rotations: u64,
    /// Total fsync operations.
    pub fsyncs: u64,
}

/// State guarded by the write lock.
pub(crate) struct ActiveLog {
    pub(crate) file: Option<LogFile>,
    last_rotation: Instant,
    writes_since_sync: u32,
}

impl ActiveLog {
    pub(crate) fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }
}

/// Write-ahead log for a single table.
///
/// Appends, rotation, replay and retention all serialize on one internal lock,
/// so an instance can be shared freely between threads.
pub struct WriteAheadLog {
    pub(crate) config: WalConfig,
    pub(crate) logs_dir: PathBuf,
    pub(crate) counter_path: PathBuf,
    pub(crate) counter: MonotonicCounter,
    pub(crate) active: Mutex<ActiveLog>,
    enabled: AtomicBool,
    closed: AtomicBool,
    stats_bytes_written: AtomicU64,
    stats_writes: AtomicU64,
    stats_bypassed: AtomicU64,
    stats_rotations: AtomicU64,
    stats_fsyncs: AtomicU64,
}

impl WriteAheadLog {
    /// Opens the log for `table_id` under `base_path` with default settings.
    pub fn open(base_path: impl Into<PathBuf>, table_id: TableId) -> Result<Self, WalError> {
        Self::with_config(WalConfig::new(base_path, table_id))
    }

    /// Opens the log described by `config`.
    ///
    /// Loads the counter sidecar if present, creates the log directory and
    /// opens a fresh active file.
    pub fn with_config(config: WalConfig) -> Result<Self, WalError> {
        let logs_dir = config.logs_dir();
        let counter_path = logs_dir.join(COUNTER_FILE_NAME);

        let last_id = match load_counter(&counter_path) {
            Ok(value) => value.unwrap_or(0),
            Err(e) => {
                // Replay re-derives the counter from the log files.
                tracing::warn!("Ignoring unreadable counter sidecar: {}", e);
                0
            }
        };

        std::fs::create_dir_all(&logs_dir).map_err(|source| WalError::CreateDirectory {
            path: logs_dir.clone(),
            source,
        })?;

        let wal = Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            logs_dir,
            counter_path,
            counter: MonotonicCounter::new(last_id),
            active: Mutex::new(ActiveLog {
                file: None,
                last_rotation: Instant::now(),
                writes_since_sync: 0,
            }),
            closed: AtomicBool::new(false),
            stats_bytes_written: AtomicU64::new(0),
            stats_writes: AtomicU64::new(0),
            stats_bypassed: AtomicU64::new(0),
            stats_rotations: AtomicU64::new(0),
            stats_fsyncs: AtomicU64::new(0),
        };

        wal.rotate_locked(&mut wal.active.lock())?;

        tracing::info!(
            "WAL opened for table {}: dir={}, last_id={}",
            wal.config.table_id,
            wal.logs_dir.display(),
            last_id
        );

        Ok(wal)
    }

    /// Closes the current active file (if any) and opens a new one named by
    /// the current epoch second.
    fn rotate_locked(&self, active: &mut ActiveLog) -> Result<(), WalError> {
        if let Some(mut previous) = active.file.take() {
            if self.config.fsync_policy != FsyncPolicy::Never && previous.sync()? {
                self.stats_fsyncs.fetch_add(1, Ordering::Relaxed);
            }
            let path = previous.path().to_path_buf();
            if let Err(e) = previous.close() {
                tracing::warn!("Failed to close log file {}: {}", path.display(), e);
            }
        }

        let created_at = chrono::Utc::now().timestamp();
        let file = LogFile::open(&self.logs_dir, created_at)?;
        tracing::debug!("Rotated to log file {}", file.path().display());

        active.file = Some(file);
        active.last_rotation = Instant::now();
        active.writes_since_sync = 0;
        self.stats_rotations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Appends an entry and returns its sequence number.
    ///
    /// When logging is disabled this performs no I/O and returns the current
    /// counter value; the caller gets no durability guarantee in that case.
    ///
    /// On an append failure the sequence number is consumed (never reused) and
    /// the next write starts a new file.
    pub fn write_entry(&self, kind: EntryKind, payload: &str) -> Result<u64, WalError> {
        if !self.is_enabled() {
            self.stats_bypassed.fetch_add(1, Ordering::Relaxed);
            return Ok(self.counter.get());
        }
        validate_payload(payload)?;

        let mut active = self.active.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(WalError::Closed);
        }

        if active.file.is_none() || active.last_rotation.elapsed() > self.config.rotation_interval
        {
            self.rotate_locked(&mut active)?;
        }

        let sequence = self.counter.increment_and_get()?;
        let line = encode_line(sequence, kind, payload)?;

        let appended = match active.file.as_mut() {
            Some(file) => file.append(&line),
            None => Err(WalError::Closed),
        };
        if let Err(e) = appended {
            tracing::warn!("WAL append of entry {} failed: {}", sequence, e);
            active.file = None;
            return Err(e);
        }

        self.stats_bytes_written
            .fetch_add(line.len() as u64, Ordering::Relaxed);
        self.stats_writes.fetch_add(1, Ordering::Relaxed);

        active.writes_since_sync += 1;
        let should_sync = match self.config.fsync_policy {
            FsyncPolicy::Never => false,
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => active.writes_since_sync >= n.max(1),
        };
        if should_sync {
            self.sync_locked(&mut active)?;
        }

        Ok(sequence)
    }

    /// Serializes `record` as JSON and appends it.
    pub fn write_record(&self, kind: EntryKind, record: &Value) -> Result<u64, WalError> {
        if !self.is_enabled() {
            self.stats_bypassed.fetch_add(1, Ordering::Relaxed);
            return Ok(self.counter.get());
        }
        let payload = serde_json::to_string(record)?;
        self.write_entry(kind, &payload)
    }

    fn sync_locked(&self, active: &mut ActiveLog) -> Result<(), WalError> {
        if let Some(file) = active.file.as_mut() {
            if file.sync()? {
                self.stats_fsyncs.fetch_add(1, Ordering::Relaxed);
            }
        }
        active.writes_since_sync = 0;
        Ok(())
    }

    /// Forces the active file to stable storage.
    pub fn sync(&self) -> Result<(), WalError> {
        self.sync_locked(&mut self.active.lock())
    }

    /// Toggles whether writes are logged. Does not touch the counter.
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            tracing::info!(
                "WAL for table {} {}",
                self.config.table_id,
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Returns the last assigned (or replayed) sequence number.
    pub fn current_sequence(&self) -> u64 {
        self.counter.get()
    }

    /// Writes the counter to the sidecar file.
    pub fn persist_counter(&self) -> Result<(), WalError> {
        store_counter(&self.counter_path, self.counter.get())
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    pub fn table_id(&self) -> TableId {
        self.config.table_id
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Returns the path of the file currently open for appends.
    pub fn active_file(&self) -> Option<PathBuf> {
        self.active.lock().path().map(Path::to_path_buf)
    }

    /// Lists the log files on disk, oldest first.
    pub fn log_files(&self) -> Result<Vec<LogFileInfo>, WalError> {
        LogFileScanner::list(&self.logs_dir)
    }

    /// Returns the total size of all log files in bytes.
    pub fn total_size(&self) -> Result<u64, WalError> {
        let mut total = 0;
        for info in self.log_files()? {
            total += std::fs::metadata(&info.path)?.len();
        }
        Ok(total)
    }

    /// Returns the current I/O statistics.
    pub fn stats(&self) -> WalStats {
        WalStats {
            bytes_written: self.stats_bytes_written.load(Ordering::Relaxed),
            writes: self.stats_writes.load(Ordering::Relaxed),
            bypassed: self.stats_bypassed.load(Ordering::Relaxed),
            rotations: self.stats_rotations.load(Ordering::Relaxed),
            fsyncs: self.stats_fsyncs.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the active file and persists the counter.
    ///
    /// Later writes fail with [`WalError::Closed`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), WalError> {
        let mut active = self.active.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let closed = match active.file.take() {
            Some(mut file) => {
                let synced = if self.config.fsync_policy != FsyncPolicy::Never {
                    file.sync().map(|_| ())
                } else {
                    Ok(())
                };
                synced.and(file.close())
            }
            None => Ok(()),
        };
        let persisted = self.persist_counter();

        tracing::info!(
            "WAL closed for table {} at sequence {}",
            self.config.table_id,
            self.counter.get()
        );

        closed.and(persisted)
    }
}

impl Drop for WriteAheadLog {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.close() {
                tracing::error!(
                    "Failed to close WAL for table {}: {}",
                    self.config.table_id,
                    e
                );
            }
        }
    }
}
