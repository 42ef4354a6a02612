//! In-memory table segment.

use crate::error::SegmentError;
use crate::schema::TableSchema;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tablewal_wal::TableSegmentSink;

/// Row identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Int(i64),
    String(String),
    /// Tables without a primary key number rows in insertion order.
    Row(u64),
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowKey::Int(v) => write!(f, "{}", v),
            RowKey::String(v) => write!(f, "{:?}", v),
            RowKey::Row(v) => write!(f, "#{}", v),
        }
    }
}

/// A stored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub record: Value,
    /// Sequence number of the entry that wrote the row.
    pub sequence: u64,
}

/// On-disk form written by [`TableSegment::checkpoint`].
#[derive(Debug, Serialize, Deserialize)]
struct SegmentSnapshot {
    schema: TableSchema,
    wal_global_id: u64,
    rows: Vec<Row>,
}

/// Rows of one table, plus the highest log sequence applied to them.
pub struct TableSegment {
    schema: Arc<TableSchema>,
    rows: DashMap<RowKey, Row>,
    next_row: AtomicU64,
    wal_global_id: AtomicU64,
}

impl TableSegment {
    /// Creates an empty segment.
    pub fn new(schema: TableSchema) -> Result<Self, SegmentError> {
        schema.validate()?;
        Ok(Self {
            schema: Arc::new(schema),
            rows: DashMap::new(),
            next_row: AtomicU64::new(0),
            wal_global_id: AtomicU64::new(0),
        })
    }

    /// Loads a segment written by [`TableSegment::checkpoint`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SegmentError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let snapshot: SegmentSnapshot = serde_json::from_reader(BufReader::new(file))?;

        let segment = Self::new(snapshot.schema)?;
        for row in snapshot.rows {
            let key = segment.row_key(&row.record)?;
            if segment.rows.insert(key.clone(), row).is_some() {
                return Err(SegmentError::Corruption(format!(
                    "snapshot {} holds key {} twice",
                    path.display(),
                    key
                )));
            }
        }
        segment
            .wal_global_id
            .store(snapshot.wal_global_id, Ordering::SeqCst);

        tracing::info!(
            "Loaded segment '{}' from {}: {} rows, wal_global_id={}",
            segment.schema.name,
            path.display(),
            segment.len(),
            snapshot.wal_global_id
        );

        Ok(segment)
    }

    /// Loads the segment at `path` if it exists, otherwise starts empty.
    pub fn load_or_new(path: impl AsRef<Path>, schema: TableSchema) -> Result<Self, SegmentError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Self::new(schema)
        }
    }

    /// Writes rows and watermark to `path`, making everything applied so far
    /// durable.
    pub fn checkpoint(&self, path: impl AsRef<Path>) -> Result<u64, SegmentError> {
        let path = path.as_ref();
        let wal_global_id = self.wal_global_id();

        let mut rows: Vec<(RowKey, Row)> = self
            .rows
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let snapshot = SegmentSnapshot {
            schema: (*self.schema).clone(),
            wal_global_id,
            rows: rows.into_iter().map(|(_, row)| row).collect(),
        };
        let data = serde_json::to_vec(&snapshot)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;

        tracing::info!(
            "Checkpointed segment '{}' to {}: {} rows, wal_global_id={}",
            self.schema.name,
            path.display(),
            snapshot.rows.len(),
            wal_global_id
        );

        Ok(wal_global_id)
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn row_key(&self, record: &Value) -> Result<RowKey, SegmentError> {
        match self.schema.primary_key_field() {
            Some(field) => key_of(record, &field.name),
            None => Ok(RowKey::Row(self.next_row.fetch_add(1, Ordering::SeqCst))),
        }
    }

    fn advance(&self, sequence: u64) {
        self.wal_global_id.fetch_max(sequence, Ordering::SeqCst);
    }

    /// Inserts a row after checking it against `schema`.
    pub fn insert(
        &self,
        schema: &TableSchema,
        record: &Value,
        sequence: u64,
    ) -> Result<(), SegmentError> {
        schema.check_record(record)?;
        let key = self.row_key(record)?;

        match self.rows.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(SegmentError::DuplicateKey(entry.key().to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Row {
                    record: record.clone(),
                    sequence,
                });
                self.advance(sequence);
                Ok(())
            }
        }
    }

    /// Deletes the row whose primary key matches `record`.
    pub fn delete_by_pk(&self, record: &Value, sequence: u64) -> Result<(), SegmentError> {
        let field = self
            .schema
            .primary_key_field()
            .ok_or_else(|| SegmentError::NoPrimaryKey(self.schema.name.clone()))?;
        let key = key_of(record, &field.name)?;

        self.rows
            .remove(&key)
            .ok_or_else(|| SegmentError::KeyNotFound(key.to_string()))?;
        self.advance(sequence);
        Ok(())
    }

    /// Looks up a row by primary key value.
    pub fn get(&self, pk: &Value) -> Option<Row> {
        let key = match pk {
            Value::Number(n) => RowKey::Int(n.as_i64()?),
            Value::String(s) => RowKey::String(s.clone()),
            _ => return None,
        };
        self.rows.get(&key).map(|row| row.value().clone())
    }

    /// Returns all records ordered by key.
    pub fn records(&self) -> Vec<Value> {
        let mut rows: Vec<(RowKey, Value)> = self
            .rows
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().record.clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows.into_iter().map(|(_, record)| record).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Highest log sequence applied to this segment.
    pub fn wal_global_id(&self) -> u64 {
        self.wal_global_id.load(Ordering::SeqCst)
    }
}

fn key_of(record: &Value, field: &str) -> Result<RowKey, SegmentError> {
    match record.get(field) {
        Some(Value::Number(n)) => n
            .as_i64()
            .map(RowKey::Int)
            .ok_or_else(|| SegmentError::TypeMismatch {
                field: field.to_string(),
                expected: "int",
                actual: "float",
            }),
        Some(Value::String(s)) => Ok(RowKey::String(s.clone())),
        Some(_) => Err(SegmentError::TypeMismatch {
            field: field.to_string(),
            expected: "int or string",
            actual: "other",
        }),
        None => Err(SegmentError::MissingField(field.to_string())),
    }
}

impl TableSegmentSink for TableSegment {
    type Schema = TableSchema;
    type Error = SegmentError;

    fn insert(&self, schema: &TableSchema, record: &Value, sequence: u64) -> Result<(), SegmentError> {
        TableSegment::insert(self, schema, record, sequence)
    }

    fn delete_by_pk(&self, record: &Value, sequence: u64) -> Result<(), SegmentError> {
        TableSegment::delete_by_pk(self, record, sequence)
    }

    fn wal_global_id(&self) -> u64 {
        TableSegment::wal_global_id(self)
    }
}
