// geosink-config - Runtime configuration for the ingestion pipeline
//
// Supports configuration from multiple sources:
// 1. Environment variables with GEOSINK_ prefix (highest priority)
// 2. Config file path from GEOSINK_CONFIG env var
// 3. Default config file locations (./geosink.toml, ./config.toml)
// 4. Built-in defaults (lowest priority)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod sources;
mod validation;

/// Main runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub warehouse: WarehouseConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            storage: StorageConfig::default(),
            warehouse: WarehouseConfig::default(),
            backup: BackupConfig::default(),
            recovery: RecoveryConfig::default(),
            scheduler: SchedulerConfig::default(),
            server: Some(ServerConfig::default()),
        }
    }
}

/// Queue store connection and key naming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub host: String,
    pub port: u16,
    pub db: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Optional prefix applied to the list keys and the lock key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
    pub gps_key: String,
    pub mobile_key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Redis,
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            password: None,
            key_prefix: None,
            gps_key: "gps:history:global".to_string(),
            mobile_key: "mobile:history:global".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn redis_url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    fn prefixed(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key.to_string(),
        }
    }

    pub fn queue_key(&self, gps: bool) -> String {
        if gps {
            self.prefixed(&self.gps_key)
        } else {
            self.prefixed(&self.mobile_key)
        }
    }

    pub fn lock_key(&self) -> String {
        self.prefixed("geosink:pipeline:lock")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Redis,
    /// In-process store for tests and credential-less development.
    Memory,
}

impl std::str::FromStr for QueueBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(QueueBackend::Redis),
            "memory" | "mem" => Ok(QueueBackend::Memory),
            _ => anyhow::bail!("Unsupported queue backend: {}. Supported: redis, memory", s),
        }
    }
}

/// Object store backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<GcsConfig>,

    pub gps_prefix: String,
    pub mobile_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            fs: Some(FsConfig::default()),
            s3: None,
            gcs: None,
            gps_prefix: "gps-data/".to_string(),
            mobile_prefix: "mobile-data/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Simulation backend writing to local disk; behavior is otherwise
    /// identical to the cloud backends.
    Fs,
    S3,
    Gcs,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Fs => write!(f, "fs"),
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Gcs => write!(f, "gcs"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fs" | "filesystem" => Ok(StorageBackend::Fs),
            "s3" | "aws" => Ok(StorageBackend::S3),
            "gcs" | "gcp" => Ok(StorageBackend::Gcs),
            _ => anyhow::bail!("Unsupported storage backend: {}. Supported: fs, s3, gcs", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    pub path: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            path: "./data/objects".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcsConfig {
    pub bucket: String,
}

/// Warehouse loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Root path of the warehouse dataset storage (fs backend).
    pub path: String,
    pub dataset: String,
    pub gps_table: String,
    pub mobile_table: String,
    pub location: String,
    pub job_timeout_secs: u64,
    pub priority: String,
    pub max_bad_records: u32,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: "./data/warehouse".to_string(),
            dataset: "location_data".to_string(),
            gps_table: "gps_records".to_string(),
            mobile_table: "mobile_records".to_string(),
            location: "US".to_string(),
            job_timeout_secs: 300,
            priority: "BATCH".to_string(),
            max_bad_records: 0,
        }
    }
}

impl WarehouseConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Local backup store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    pub max_retries: u32,
    pub retention_hours: u64,
    pub path: String,
    pub cleanup_interval_min: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retention_hours: 24,
            path: "tmp/atomic-backups".to_string(),
            cleanup_interval_min: 60,
        }
    }
}

impl BackupConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }
}

/// Recovery registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub max_retries: u32,
    pub cleanup_on_success: bool,
    pub path: String,
    /// Pause between processed entries, to avoid bursting the warehouse.
    pub pause_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            cleanup_on_success: true,
            path: "tmp/atomic-backups/gcs-recovery".to_string(),
            pause_ms: 1500,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_interval_min: u64,
    pub lock_max_wait_secs: u64,
    pub tmp_cleanup_interval_min: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_min: 5,
            lock_max_wait_secs: 30,
            tmp_cleanup_interval_min: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_min * 60)
    }

    /// Lock TTL absorbs long ticks without self-starvation.
    pub fn lock_ttl(&self) -> Duration {
        self.tick_interval() + Duration::from_secs(30)
    }

    pub fn lock_max_wait(&self) -> Duration {
        Duration::from_secs(self.lock_max_wait_secs)
    }
}

/// Admin/health server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Load configuration from an explicit file path, then apply env overrides
    pub fn load_from_path(path: &Path) -> Result<Self> {
        sources::load_config_from_path(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_backend_from_str() {
        assert_eq!("fs".parse::<StorageBackend>().unwrap(), StorageBackend::Fs);
        assert_eq!("gcs".parse::<StorageBackend>().unwrap(), StorageBackend::Gcs);
        assert_eq!("aws".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert!("azure".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_default_configs() {
        let config = RuntimeConfig::default();
        assert_eq!(config.queue.gps_key, "gps:history:global");
        assert_eq!(config.storage.gps_prefix, "gps-data/");
        assert_eq!(config.warehouse.job_timeout_secs, 300);
        assert_eq!(config.warehouse.max_bad_records, 0);
        assert_eq!(config.backup.path, "tmp/atomic-backups");
        assert!(config.recovery.cleanup_on_success);
    }

    #[test]
    fn test_key_prefix_applies_to_lists_and_lock() {
        let mut queue = QueueConfig::default();
        queue.key_prefix = Some("staging:".to_string());
        assert_eq!(queue.queue_key(true), "staging:gps:history:global");
        assert_eq!(queue.lock_key(), "staging:geosink:pipeline:lock");
    }

    #[test]
    fn test_redis_url_includes_password_and_db() {
        let mut queue = QueueConfig::default();
        queue.db = 2;
        assert_eq!(queue.redis_url(), "redis://127.0.0.1:6379/2");
        queue.password = Some("secret".to_string());
        assert_eq!(queue.redis_url(), "redis://:secret@127.0.0.1:6379/2");
    }

    #[test]
    fn test_lock_ttl_exceeds_tick_interval() {
        let scheduler = SchedulerConfig::default();
        assert_eq!(
            scheduler.lock_ttl(),
            scheduler.tick_interval() + Duration::from_secs(30)
        );
    }
}
