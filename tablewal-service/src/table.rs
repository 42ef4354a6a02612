//! A table whose changes are logged before they reach its segment.

use crate::config::{Config, TableConfig};
use crate::error::ServiceError;
use crate::metrics::Metrics;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tablewal_segment::{Row, SegmentError, TableSchema, TableSegment};
use tablewal_wal::{EntryKind, ReplayReport, TableId, WriteAheadLog};

/// One open table: its log, its in-memory segment and the checkpoint path.
pub struct Table {
    id: TableId,
    schema: TableSchema,
    wal: Arc<WriteAheadLog>,
    segment: TableSegment,
    segment_path: PathBuf,
    /// Keeps log order and apply order identical, so the segment watermark
    /// never passes an entry that has not been applied.
    write_lock: Mutex<()>,
    metrics: Option<Arc<Metrics>>,
}

impl Table {
    /// Opens a table and replays its log into the last checkpoint.
    pub fn open(config: &Config, table: &TableConfig) -> Result<(Self, ReplayReport), ServiceError> {
        Self::open_with_metrics(config, table, None)
    }

    /// Like [`Table::open`], recording replay and write metrics.
    pub fn open_with_metrics(
        config: &Config,
        table: &TableConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<(Self, ReplayReport), ServiceError> {
        let segment_path = config.storage.segment_path(table.id);
        let segment = TableSegment::load_or_new(&segment_path, table.schema.clone())?;
        if segment.schema() != &table.schema {
            return Err(ServiceError::SchemaMismatch(table.id));
        }

        let wal = Arc::new(WriteAheadLog::with_config(config.wal_config(table.id))?);

        let started = Instant::now();
        let report = wal.replay(&table.schema, &segment);
        let elapsed = started.elapsed();

        if let Some(metrics) = &metrics {
            metrics.record_replay(table.id, &report, elapsed.as_secs_f64());
            if let Ok(files) = wal.log_files() {
                metrics.set_log_files(table.id, files.len());
            }
        }

        tracing::info!(
            "Opened table {} ('{}'): {} rows, {} applied, {} skipped, {} failed in {:?}",
            table.id,
            table.schema.name,
            segment.len(),
            report.entries_applied,
            report.entries_skipped,
            report.entries_failed,
            elapsed
        );

        Ok((
            Self {
                id: table.id,
                schema: table.schema.clone(),
                wal,
                segment,
                segment_path,
                write_lock: Mutex::new(()),
                metrics,
            },
            report,
        ))
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Shared handle to the table's log.
    pub fn wal(&self) -> &Arc<WriteAheadLog> {
        &self.wal
    }

    pub fn segment(&self) -> &TableSegment {
        &self.segment
    }

    pub fn segment_path(&self) -> &Path {
        &self.segment_path
    }

    /// Logs and applies an insert. Returns the entry's sequence number.
    ///
    /// The record is checked before it is logged so a rejected row never
    /// reaches the log.
    pub fn insert(&self, record: &Value) -> Result<u64, ServiceError> {
        self.schema.check_record(record)?;

        let _guard = self.write_lock.lock();
        if let Some(pk) = self.primary_key_value(record) {
            if self.segment.get(pk).is_some() {
                return Err(SegmentError::DuplicateKey(pk.to_string()).into());
            }
        }

        let sequence = self.wal.write_record(EntryKind::Insert, record)?;
        self.segment.insert(&self.schema, record, sequence)?;
        self.record_write(EntryKind::Insert);
        Ok(sequence)
    }

    /// Logs and applies a delete by primary key.
    pub fn delete(&self, record: &Value) -> Result<u64, ServiceError> {
        let field = self
            .schema
            .primary_key_field()
            .ok_or_else(|| SegmentError::NoPrimaryKey(self.schema.name.clone()))?;
        let pk = record
            .get(&field.name)
            .ok_or_else(|| SegmentError::MissingField(field.name.clone()))?;

        let _guard = self.write_lock.lock();
        if self.segment.get(pk).is_none() {
            return Err(SegmentError::KeyNotFound(pk.to_string()).into());
        }

        let sequence = self.wal.write_record(EntryKind::Delete, record)?;
        self.segment.delete_by_pk(record, sequence)?;
        self.record_write(EntryKind::Delete);
        Ok(sequence)
    }

    fn primary_key_value<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        let field = self.schema.primary_key_field()?;
        record.get(&field.name)
    }

    fn record_write(&self, kind: EntryKind) {
        if !self.wal.is_enabled() {
            return;
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_write(self.id, kind.as_str());
        }
    }

    /// Looks up a row by primary key value.
    pub fn get(&self, pk: &Value) -> Option<Row> {
        self.segment.get(pk)
    }

    /// Writes the segment to its checkpoint file. Returns the watermark
    /// stored with it.
    pub fn checkpoint(&self) -> Result<u64, ServiceError> {
        let _guard = self.write_lock.lock();
        self.wal.sync()?;
        Ok(self.segment.checkpoint(&self.segment_path)?)
    }

    /// Checkpoints the segment and closes the log.
    pub fn close(&self) -> Result<(), ServiceError> {
        let watermark = self.checkpoint()?;
        self.wal.close()?;
        tracing::info!("Closed table {} at watermark {}", self.id, watermark);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tablewal_segment::FieldType;
    use tablewal_wal::WalError;
    use tempfile::TempDir;

    fn setup(dir: &Path) -> (Config, TableConfig) {
        let mut config = Config::default();
        config.storage.data_dir = dir.to_path_buf();
        let table = TableConfig {
            id: 1,
            schema: TableSchema::new("docs")
                .primary_key("id", FieldType::Int)
                .field("body", FieldType::String),
        };
        config.tables.push(table.clone());
        (config, table)
    }

    #[test]
    fn test_insert_delete_and_reopen() {
        let dir = TempDir::new().unwrap();
        let (config, table_config) = setup(dir.path());

        {
            let (table, report) = Table::open(&config, &table_config).unwrap();
            assert!(report.is_clean());
            assert_eq!(table.insert(&json!({"id": 1, "body": "a"})).unwrap(), 1);
            assert_eq!(table.insert(&json!({"id": 2, "body": "b"})).unwrap(), 2);
            assert_eq!(table.delete(&json!({"id": 1})).unwrap(), 3);
            table.wal().close().unwrap();
        }

        let (table, report) = Table::open(&config, &table_config).unwrap();
        assert_eq!(report.entries_applied, 3);
        assert_eq!(table.segment().records(), vec![json!({"id": 2, "body": "b"})]);
        assert_eq!(table.insert(&json!({"id": 3, "body": "c"})).unwrap(), 4);
    }

    #[test]
    fn test_rejected_rows_are_not_logged() {
        let dir = TempDir::new().unwrap();
        let (config, table_config) = setup(dir.path());
        let (table, _) = Table::open(&config, &table_config).unwrap();

        table.insert(&json!({"id": 1, "body": "a"})).unwrap();
        assert!(matches!(
            table.insert(&json!({"id": 1, "body": "again"})),
            Err(ServiceError::Segment(SegmentError::DuplicateKey(_)))
        ));
        assert!(matches!(
            table.insert(&json!({"id": "x", "body": "a"})),
            Err(ServiceError::Segment(SegmentError::TypeMismatch { .. }))
        ));
        assert!(matches!(
            table.delete(&json!({"id": 9})),
            Err(ServiceError::Segment(SegmentError::KeyNotFound(_)))
        ));
        assert!(matches!(
            table.delete(&json!({"body": "a"})),
            Err(ServiceError::Segment(SegmentError::MissingField(_)))
        ));

        assert_eq!(table.wal().current_sequence(), 1);
    }

    #[test]
    fn test_close_checkpoints_and_prunes_on_reopen() {
        let dir = TempDir::new().unwrap();
        let (mut config, table_config) = setup(dir.path());
        config.wal.rotation_interval_secs = 1;

        {
            let (table, _) = Table::open(&config, &table_config).unwrap();
            table.insert(&json!({"id": 1, "body": "a"})).unwrap();
            table.insert(&json!({"id": 2, "body": "b"})).unwrap();
            table.close().unwrap();
            assert!(table.segment_path().exists());
            assert!(matches!(
                table.insert(&json!({"id": 3, "body": "c"})),
                Err(ServiceError::Wal(WalError::Closed))
            ));
        }

        // Wait for the next open to land in a newer log file.
        std::thread::sleep(std::time::Duration::from_millis(1100));

        let (table, report) = Table::open(&config, &table_config).unwrap();
        assert_eq!(report.watermark, 2);
        assert_eq!(report.entries_applied, 0);
        assert_eq!(report.entries_skipped, 2);
        assert_eq!(report.files_removed.len(), 1);
        assert_eq!(table.segment().len(), 2);
        assert_eq!(table.insert(&json!({"id": 3, "body": "c"})).unwrap(), 3);
    }

    #[test]
    fn test_disabled_log_still_applies() {
        let dir = TempDir::new().unwrap();
        let (config, table_config) = setup(dir.path());
        let (table, _) = Table::open(&config, &table_config).unwrap();

        table.insert(&json!({"id": 1, "body": "a"})).unwrap();
        table.wal().set_enabled(false);
        assert_eq!(table.insert(&json!({"id": 2, "body": "b"})).unwrap(), 1);
        table.wal().set_enabled(true);
        assert_eq!(table.insert(&json!({"id": 3, "body": "c"})).unwrap(), 2);
        assert_eq!(table.segment().len(), 3);
    }

    #[test]
    fn test_schema_mismatch() {
        let dir = TempDir::new().unwrap();
        let (config, table_config) = setup(dir.path());
        {
            let (table, _) = Table::open(&config, &table_config).unwrap();
            table.close().unwrap();
        }

        let changed = TableConfig {
            id: 1,
            schema: table_config.schema.clone().field("extra", FieldType::Bool),
        };
        assert!(matches!(
            Table::open(&config, &changed),
            Err(ServiceError::SchemaMismatch(1))
        ));
    }

    #[test]
    fn test_metrics_recorded() {
        let dir = TempDir::new().unwrap();
        let (config, table_config) = setup(dir.path());
        let metrics = Arc::new(Metrics::new().unwrap());
        let (table, _) =
            Table::open_with_metrics(&config, &table_config, Some(metrics.clone())).unwrap();

        table.insert(&json!({"id": 1, "body": "a"})).unwrap();
        table.wal().set_enabled(false);
        table.insert(&json!({"id": 2, "body": "b"})).unwrap();

        assert_eq!(
            metrics
                .entries_written_total
                .with_label_values(&["1", "insert"])
                .get(),
            1.0
        );
        assert_eq!(metrics.log_files.with_label_values(&["1"]).get(), 1.0);
    }
}
