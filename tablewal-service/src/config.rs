//! Service configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via TABLEWAL_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tablewal_segment::TableSchema;
use tablewal_wal::{TableId, WalConfig};

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Log settings shared by every table.
    pub wal: WalSettings,
    /// Background retention configuration.
    pub maintenance: MaintenanceConfig,
    /// Tables to open at startup.
    pub tables: Vec<TableConfig>,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("TABLEWAL_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.storage.apply_env_overrides();
        self.wal.apply_env_overrides();
        self.maintenance.apply_env_overrides();
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Checks table ids are unique, schemas are well formed and intervals are
    /// non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wal.rotation_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "wal.rotation_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.maintenance.enabled && self.maintenance.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "maintenance.interval_secs must be greater than 0".to_string(),
            ));
        }
        if let FsyncPolicy::EveryN(0) = self.wal.fsync_policy {
            return Err(ConfigError::ValidationError(
                "wal.fsync_policy every_n needs a count above 0".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for table in &self.tables {
            if !ids.insert(table.id) {
                return Err(ConfigError::ValidationError(format!(
                    "table id {} is configured twice",
                    table.id
                )));
            }
            table.schema.validate().map_err(|e| {
                ConfigError::ValidationError(format!("table {}: {}", table.id, e))
            })?;
        }

        Ok(())
    }

    /// Builds the log configuration for one table.
    pub fn wal_config(&self, table_id: TableId) -> WalConfig {
        WalConfig::new(self.storage.data_dir.clone(), table_id)
            .with_rotation_interval(self.wal.rotation_interval())
            .with_retention(self.wal.retention())
            .with_fsync_policy(self.wal.fsync_policy.into())
            .with_enabled(self.wal.enabled)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory. Each table keeps its files under `<data_dir>/<id>/`.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl StorageConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("TABLEWAL_DATA") {
            self.data_dir = PathBuf::from(dir);
        }
    }

    /// Returns the directory holding a table's files.
    pub fn table_dir(&self, table_id: TableId) -> PathBuf {
        self.data_dir.join(table_id.to_string())
    }

    /// Returns the checkpoint file of a table's segment.
    pub fn segment_path(&self, table_id: TableId) -> PathBuf {
        self.table_dir(table_id).join("segment.json")
    }
}

/// Fsync policy for log writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    /// Fsync after every write (safest, slowest).
    EveryWrite,
    /// Fsync after N writes.
    EveryN(u32),
    /// Never fsync, rely on OS (fastest, least safe).
    Never,
}

impl From<FsyncPolicy> for tablewal_wal::FsyncPolicy {
    fn from(policy: FsyncPolicy) -> Self {
        match policy {
            FsyncPolicy::EveryWrite => tablewal_wal::FsyncPolicy::EveryWrite,
            FsyncPolicy::EveryN(n) => tablewal_wal::FsyncPolicy::EveryN(n),
            FsyncPolicy::Never => tablewal_wal::FsyncPolicy::Never,
        }
    }
}

/// Log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalSettings {
    /// Log writes at all. When false, writes are accepted but not recorded.
    pub enabled: bool,
    /// Seconds before the active log file is replaced by a new one.
    pub rotation_interval_secs: u64,
    /// Seconds a log file is kept after creation.
    pub retention_secs: u64,
    /// Fsync policy.
    pub fsync_policy: FsyncPolicy,
}

impl Default for WalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            rotation_interval_secs: tablewal_wal::DEFAULT_ROTATION_INTERVAL.as_secs(),
            retention_secs: tablewal_wal::DEFAULT_RETENTION.as_secs(),
            fsync_policy: FsyncPolicy::Never,
        }
    }
}

impl WalSettings {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("TABLEWAL_WAL_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }

        if let Ok(secs) = std::env::var("TABLEWAL_ROTATION_SECS") {
            if let Ok(n) = secs.parse() {
                self.rotation_interval_secs = n;
            }
        }

        if let Ok(secs) = std::env::var("TABLEWAL_RETENTION_SECS") {
            if let Ok(n) = secs.parse() {
                self.retention_secs = n;
            }
        }

        if let Ok(policy) = std::env::var("TABLEWAL_FSYNC_POLICY") {
            if let Some(parsed) = parse_fsync_policy(&policy) {
                self.fsync_policy = parsed;
            } else {
                tracing::warn!("Ignoring unknown TABLEWAL_FSYNC_POLICY '{}'", policy);
            }
        }
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

fn parse_fsync_policy(value: &str) -> Option<FsyncPolicy> {
    match value.to_lowercase().as_str() {
        "every_write" | "everywrite" => Some(FsyncPolicy::EveryWrite),
        "never" => Some(FsyncPolicy::Never),
        s => s
            .strip_prefix("every_n:")
            .and_then(|n| n.parse().ok())
            .map(FsyncPolicy::EveryN),
    }
}

/// Background retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Run retention periodically.
    pub enabled: bool,
    /// Seconds between retention passes.
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
        }
    }
}

impl MaintenanceConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("TABLEWAL_MAINTENANCE_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }

        if let Ok(interval) = std::env::var("TABLEWAL_MAINTENANCE_INTERVAL") {
            if let Ok(secs) = interval.parse() {
                self.interval_secs = secs;
            }
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn is_disabled(&self) -> bool {
        !self.enabled || self.interval_secs == 0
    }
}

/// A table opened at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub id: TableId,
    pub schema: TableSchema,
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
