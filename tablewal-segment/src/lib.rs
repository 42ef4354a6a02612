//! # tablewal-segment
//!
//! In-memory table segment for tablewal.
//!
//! This crate provides:
//! - Table schemas and record validation
//! - Primary-key keyed row storage
//! - The durable watermark replay compares against
//! - JSON checkpoints of rows and watermark

pub mod error;
pub mod schema;
pub mod segment;

pub use error::SegmentError;
pub use schema::{FieldSchema, FieldType, TableSchema};
pub use segment::{Row, RowKey, TableSegment};
