//! # tablewal-service
//!
//! Embedding layer for tablewal.
//!
//! This crate provides:
//! - YAML and environment configuration
//! - Tables that log each change before applying it to their segment
//! - Background retention of expired log files
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod maintenance;
pub mod metrics;
pub mod table;

pub use config::{
    Config, ConfigError, FsyncPolicy, MaintenanceConfig, StorageConfig, TableConfig, WalSettings,
};
pub use error::ServiceError;
pub use maintenance::{RetentionManager, RetentionResult, RetentionStats};
pub use metrics::Metrics;
pub use table::Table;
