//! Background log retention.

use crate::config::MaintenanceConfig;
use crate::metrics::Metrics;
use crate::table::Table;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Checkpoints every registered table and deletes its expired log files at a
/// fixed interval. Only files whose entries are all covered by the checkpoint
/// are deleted.
pub struct RetentionManager {
    tables: RwLock<Vec<Arc<Table>>>,
    config: MaintenanceConfig,
    metrics: Option<Arc<Metrics>>,
    runs: AtomicU64,
    files_removed: AtomicU64,
    last_run: Mutex<Option<Instant>>,
    shutdown: AtomicBool,
    notify: Notify,
}

impl RetentionManager {
    pub fn new(config: MaintenanceConfig) -> Self {
        Self {
            tables: RwLock::new(Vec::new()),
            config,
            metrics: None,
            runs: AtomicU64::new(0),
            files_removed: AtomicU64::new(0),
            last_run: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Adds a table to every future pass.
    pub fn register(&self, table: Arc<Table>) {
        self.tables.write().push(table);
    }

    /// Runs a pass on the next loop iteration instead of waiting for the
    /// interval.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Runs one retention pass over every registered table.
    ///
    /// A table whose checkpoint fails keeps all of its files this pass.
    pub fn run_once(&self) -> RetentionResult {
        let tables: Vec<_> = self.tables.read().clone();
        let mut result = RetentionResult::default();

        for table in tables {
            let wal = table.wal();
            if wal.is_closed() {
                continue;
            }

            let watermark = match table.checkpoint() {
                Ok(watermark) => watermark,
                Err(e) => {
                    tracing::warn!(
                        "Skipping retention for table {}: checkpoint failed: {}",
                        table.id(),
                        e
                    );
                    result.checkpoint_errors += 1;
                    continue;
                }
            };

            let report = wal.cleanup_old_files_below(watermark);
            result.logs_checked += 1;
            result.files_removed += report.files_removed.len();
            result.diagnostics += report.diagnostics.len();

            if let Some(metrics) = &self.metrics {
                metrics.record_retention(table.id(), &report);
                if let Ok(files) = wal.log_files() {
                    metrics.set_log_files(table.id(), files.len());
                }
            }
        }

        self.runs.fetch_add(1, Ordering::Relaxed);
        self.files_removed
            .fetch_add(result.files_removed as u64, Ordering::Relaxed);
        *self.last_run.lock() = Some(Instant::now());

        result
    }

    /// Runs the retention loop (call from a background task).
    pub async fn run(&self) {
        if self.config.is_disabled() {
            tracing::info!("Log retention is disabled");
            return;
        }

        tracing::info!(
            "Retention manager started (interval={}s)",
            self.config.interval_secs
        );

        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.config.interval()) => {}
            }

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            tracing::debug!("Starting log retention pass");
            let result = self.run_once();
            if result.files_removed > 0 || result.diagnostics > 0 || result.checkpoint_errors > 0
            {
                tracing::info!(
                    "Retention pass complete: {} logs, {} files removed, {} problems, {} failed checkpoints",
                    result.logs_checked,
                    result.files_removed,
                    result.diagnostics,
                    result.checkpoint_errors
                );
            }
        }

        tracing::info!("Retention manager stopped");
    }

    /// Signals the retention loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }

    pub fn stats(&self) -> RetentionStats {
        RetentionStats {
            tables: self.tables.read().len(),
            runs: self.runs.load(Ordering::Relaxed),
            files_removed: self.files_removed.load(Ordering::Relaxed),
            since_last_run: self.last_run.lock().map(|at| at.elapsed()),
        }
    }
}

/// Result of one pass.
#[derive(Debug, Default)]
pub struct RetentionResult {
    pub logs_checked: usize,
    pub files_removed: usize,
    pub diagnostics: usize,
    /// Tables skipped because their checkpoint could not be written.
    pub checkpoint_errors: usize,
}

/// Retention statistics.
#[derive(Debug)]
pub struct RetentionStats {
    pub tables: usize,
    pub runs: u64,
    pub files_removed: u64,
    pub since_last_run: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, TableConfig};
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use tablewal_segment::{FieldType, TableSchema};
    use tempfile::TempDir;

    const DAY: u64 = 24 * 3600;

    fn config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.to_path_buf();
        config.wal.retention_secs = DAY;
        config
    }

    fn table_config(id: u64) -> TableConfig {
        TableConfig {
            id,
            schema: TableSchema::new("docs")
                .primary_key("id", FieldType::Int)
                .field("body", FieldType::String),
        }
    }

    fn open(config: &Config, id: u64) -> Arc<Table> {
        let (table, _) = Table::open(config, &table_config(id)).unwrap();
        Arc::new(table)
    }

    /// Logs one row, then plants a three-day-old file holding that entry.
    fn stale_file(table: &Table) -> PathBuf {
        let sequence = table.insert(&json!({"id": 1, "body": "a"})).unwrap();
        let created_at = chrono::Utc::now().timestamp() - 3 * DAY as i64;
        let path = table.wal().logs_dir().join(format!("{}.log", created_at));
        std::fs::write(&path, format!("{} 1 {{\"id\":1,\"body\":\"a\"}}\n", sequence)).unwrap();
        path
    }

    #[test]
    fn test_run_once_covers_every_table() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let a = open(&config, 1);
        let b = open(&config, 2);
        let stale_a = stale_file(&a);
        let stale_b = stale_file(&b);

        let metrics = Arc::new(Metrics::new().unwrap());
        let manager =
            RetentionManager::new(MaintenanceConfig::default()).with_metrics(metrics.clone());
        manager.register(a.clone());
        manager.register(b.clone());

        let result = manager.run_once();
        assert_eq!(result.logs_checked, 2);
        assert_eq!(result.files_removed, 2);
        assert_eq!(result.checkpoint_errors, 0);
        assert!(!stale_a.exists());
        assert!(!stale_b.exists());
        assert!(a.wal().active_file().unwrap().exists());
        assert!(a.segment_path().exists());

        let stats = manager.stats();
        assert_eq!(stats.tables, 2);
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.files_removed, 2);
        assert!(stats.since_last_run.is_some());
        assert_eq!(
            metrics
                .files_removed_total
                .with_label_values(&["1", "expired"])
                .get(),
            1.0
        );
        assert_eq!(metrics.log_files.with_label_values(&["2"]).get(), 1.0);
    }

    #[test]
    fn test_expired_files_survive_until_checkpointed() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.wal.rotation_interval_secs = 1;
        config.wal.retention_secs = 1;

        let table = open(&config, 1);
        table.insert(&json!({"id": 1, "body": "a"})).unwrap();
        std::thread::sleep(Duration::from_millis(2100));
        table.insert(&json!({"id": 2, "body": "b"})).unwrap();

        let manager = RetentionManager::new(MaintenanceConfig::default());
        manager.register(table.clone());
        let result = manager.run_once();
        assert_eq!(result.files_removed, 1);

        // Crash: nothing is closed or dropped.
        std::mem::forget(manager);
        std::mem::forget(table);

        let reopened = open(&config, 1);
        assert!(reopened.get(&json!(1)).is_some());
        assert!(reopened.get(&json!(2)).is_some());
    }

    #[test]
    fn test_failed_checkpoint_keeps_files() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let table = open(&config, 1);
        let stale = stale_file(&table);

        // A non-empty directory where the checkpoint file should go.
        std::fs::create_dir_all(table.segment_path().join("blocker")).unwrap();

        let manager = RetentionManager::new(MaintenanceConfig::default());
        manager.register(table);
        let result = manager.run_once();
        assert_eq!(result.checkpoint_errors, 1);
        assert_eq!(result.logs_checked, 0);
        assert!(stale.exists());
    }

    #[test]
    fn test_closed_tables_are_skipped() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let table = open(&config, 1);
        let stale = stale_file(&table);
        table.close().unwrap();

        let manager = RetentionManager::new(MaintenanceConfig::default());
        manager.register(table);
        let result = manager.run_once();
        assert_eq!(result.logs_checked, 0);
        assert!(stale.exists());
    }

    #[tokio::test]
    async fn test_trigger_and_shutdown() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let table = open(&config, 1);
        let stale = stale_file(&table);

        let manager = Arc::new(RetentionManager::new(MaintenanceConfig {
            enabled: true,
            interval_secs: 3600,
        }));
        manager.register(table);

        let handle = tokio::spawn({
            let manager = manager.clone();
            async move { manager.run().await }
        });

        manager.trigger();
        for _ in 0..100 {
            if manager.stats().runs > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.stats().runs, 1);
        assert!(!stale.exists());

        manager.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_disabled_returns_immediately() {
        let manager = RetentionManager::new(MaintenanceConfig {
            enabled: false,
            interval_secs: 3600,
        });
        tokio::time::timeout(Duration::from_secs(1), manager.run())
            .await
            .unwrap();
        assert_eq!(manager.stats().runs, 0);
    }
}
