//! The storage side of replay.

use serde_json::Value;

/// A table segment that logged entries are replayed into.
///
/// The segment owns the durable watermark: the highest sequence number it has
/// already materialized. Replay skips everything at or below it.
pub trait TableSegmentSink {
    /// Schema handed through to [`TableSegmentSink::insert`].
    type Schema: ?Sized;
    /// Rejection reason reported back to the replay caller.
    type Error: std::fmt::Display;

    /// Applies a logged insert.
    fn insert(&self, schema: &Self::Schema, record: &Value, sequence: u64)
        -> Result<(), Self::Error>;

    /// Applies a logged delete, locating the row by primary key.
    fn delete_by_pk(&self, record: &Value, sequence: u64) -> Result<(), Self::Error>;

    /// Highest sequence number already durable in the segment.
    fn wal_global_id(&self) -> u64;
}

impl<T: TableSegmentSink + ?Sized> TableSegmentSink for std::sync::Arc<T> {
    type Schema = T::Schema;
    type Error = T::Error;

    fn insert(
        &self,
        schema: &Self::Schema,
        record: &Value,
        sequence: u64,
    ) -> Result<(), Self::Error> {
        (**self).insert(schema, record, sequence)
    }

    fn delete_by_pk(&self, record: &Value, sequence: u64) -> Result<(), Self::Error> {
        (**self).delete_by_pk(record, sequence)
    }

    fn wal_global_id(&self) -> u64 {
        (**self).wal_global_id()
    }
}
