//! tablewal - per-table write-ahead logging
//!
//! Opens every configured table, replays its log, runs retention in the
//! background and checkpoints all tables on shutdown.

use std::sync::Arc;
use tablewal_service::{Config, Metrics, RetentionManager, Table};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if TABLEWAL_CONFIG is set, then env overrides)
    let config_path = std::env::var("TABLEWAL_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    tracing::info!("Starting tablewal");
    tracing::info!("  Data directory: {}", config.storage.data_dir.display());
    tracing::info!(
        "  WAL: {} (rotation={}s, retention={}s, fsync={:?})",
        if config.wal.enabled { "enabled" } else { "disabled" },
        config.wal.rotation_interval_secs,
        config.wal.retention_secs,
        config.wal.fsync_policy
    );
    if config.tables.is_empty() {
        tracing::warn!("No tables configured");
    }

    let metrics = Arc::new(Metrics::new()?);

    // Open tables, replaying each log into its last checkpoint
    let mut tables = Vec::with_capacity(config.tables.len());
    for table_config in &config.tables {
        let (table, report) =
            Table::open_with_metrics(&config, table_config, Some(metrics.clone()))?;
        if !report.is_clean() {
            tracing::warn!(
                "Table {} replayed with {} problem(s)",
                table.id(),
                report.diagnostics.len()
            );
        }
        tables.push(Arc::new(table));
    }

    // Create and start retention manager
    let retention = Arc::new(
        RetentionManager::new(config.maintenance.clone()).with_metrics(metrics.clone()),
    );
    for table in &tables {
        retention.register(table.clone());
    }

    if config.maintenance.is_disabled() {
        tracing::info!("  Retention: disabled");
    } else {
        tracing::info!(
            "  Retention: every {}s",
            config.maintenance.interval_secs
        );
    }

    let retention_handle = {
        let rm = retention.clone();
        tokio::spawn(async move {
            rm.run().await;
        })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, closing tables...");

    retention.shutdown();
    let _ = retention_handle.await;

    for table in &tables {
        if let Err(e) = table.close() {
            tracing::error!("Failed to close table {}: {}", table.id(), e);
        }
    }

    match metrics.encode() {
        Ok(text) => tracing::debug!("Final metrics:\n{}", String::from_utf8_lossy(&text)),
        Err(e) => tracing::warn!("Failed to encode metrics: {}", e),
    }

    tracing::info!("tablewal stopped");
    Ok(())
}
