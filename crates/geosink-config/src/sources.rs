// Configuration source loading
//
// Loads configuration from multiple sources with priority:
// 1. Environment variables with GEOSINK_ prefix (highest)
// 2. Config file from GEOSINK_CONFIG path
// 3. Default config files (./geosink.toml, ./config.toml)
// 4. Built-in defaults (lowest)

use crate::*;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

/// Load configuration from all sources
pub fn load_config() -> Result<RuntimeConfig> {
    let mut config = if let Some(file_config) = load_from_file()? {
        file_config
    } else {
        RuntimeConfig::default()
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;

    Ok(config)
}

/// Load configuration from an explicit path, then env overrides
pub fn load_config_from_path(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config: RuntimeConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    apply_env_overrides(&mut config)?;
    config.validate()?;

    Ok(config)
}

fn load_from_file() -> Result<Option<RuntimeConfig>> {
    if let Ok(path) = env::var("GEOSINK_CONFIG") {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: RuntimeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        return Ok(Some(config));
    }

    for path in &["./geosink.toml", "./config.toml"] {
        if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path))?;
            let config: RuntimeConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path))?;
            return Ok(Some(config));
        }
    }

    Ok(None)
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value for {}: {}", key, e)),
        None => Ok(None),
    }
}

fn env_bool(key: &str) -> Result<Option<bool>> {
    match env_string(key) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => anyhow::bail!("invalid boolean for {}: {}", key, other),
        },
        None => Ok(None),
    }
}

/// Apply GEOSINK_* environment overrides onto the config
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<()> {
    // Queue store
    if let Some(backend) = env_parse::<QueueBackend>("GEOSINK_QUEUE_BACKEND")? {
        config.queue.backend = backend;
    }
    if let Some(host) = env_string("GEOSINK_QUEUE_HOST") {
        config.queue.host = host;
    }
    if let Some(port) = env_parse::<u16>("GEOSINK_QUEUE_PORT")? {
        config.queue.port = port;
    }
    if let Some(db) = env_parse::<i64>("GEOSINK_QUEUE_DB")? {
        config.queue.db = db;
    }
    if let Some(password) = env_string("GEOSINK_QUEUE_PASSWORD") {
        config.queue.password = Some(password);
    }
    if let Some(prefix) = env_string("GEOSINK_QUEUE_KEY_PREFIX") {
        config.queue.key_prefix = Some(prefix);
    }

    // Object store
    if let Some(backend) = env_parse::<StorageBackend>("GEOSINK_STORAGE_BACKEND")? {
        config.storage.backend = backend;
    }
    if let Some(path) = env_string("GEOSINK_STORAGE_PATH") {
        config.storage.fs = Some(FsConfig { path });
    }
    if let Some(bucket) = env_string("GEOSINK_STORAGE_BUCKET") {
        match config.storage.backend {
            StorageBackend::Gcs => config.storage.gcs = Some(GcsConfig { bucket }),
            StorageBackend::S3 => {
                let s3 = config.storage.s3.get_or_insert_with(|| S3Config {
                    bucket: String::new(),
                    region: "us-east-1".to_string(),
                    endpoint: None,
                });
                s3.bucket = bucket;
            }
            StorageBackend::Fs => {}
        }
    }
    if let Some(prefix) = env_string("GEOSINK_STORAGE_GPS_PREFIX") {
        config.storage.gps_prefix = prefix;
    }
    if let Some(prefix) = env_string("GEOSINK_STORAGE_MOBILE_PREFIX") {
        config.storage.mobile_prefix = prefix;
    }

    // Warehouse
    if let Some(path) = env_string("GEOSINK_WAREHOUSE_PATH") {
        config.warehouse.path = path;
    }
    if let Some(dataset) = env_string("GEOSINK_WAREHOUSE_DATASET") {
        config.warehouse.dataset = dataset;
    }
    if let Some(table) = env_string("GEOSINK_WAREHOUSE_GPS_TABLE") {
        config.warehouse.gps_table = table;
    }
    if let Some(table) = env_string("GEOSINK_WAREHOUSE_MOBILE_TABLE") {
        config.warehouse.mobile_table = table;
    }
    if let Some(location) = env_string("GEOSINK_WAREHOUSE_LOCATION") {
        config.warehouse.location = location;
    }
    if let Some(timeout) = env_parse::<u64>("GEOSINK_WAREHOUSE_JOB_TIMEOUT_SECS")? {
        config.warehouse.job_timeout_secs = timeout;
    }
    if let Some(priority) = env_string("GEOSINK_WAREHOUSE_PRIORITY") {
        config.warehouse.priority = priority;
    }
    if let Some(max_bad) = env_parse::<u32>("GEOSINK_WAREHOUSE_MAX_BAD_RECORDS")? {
        config.warehouse.max_bad_records = max_bad;
    }

    // Backup store
    if let Some(retries) = env_parse::<u32>("GEOSINK_BACKUP_MAX_RETRIES")? {
        config.backup.max_retries = retries;
    }
    if let Some(hours) = env_parse::<u64>("GEOSINK_BACKUP_RETENTION_HOURS")? {
        config.backup.retention_hours = hours;
    }
    if let Some(path) = env_string("GEOSINK_BACKUP_PATH") {
        config.backup.path = path;
    }
    if let Some(minutes) = env_parse::<u64>("GEOSINK_BACKUP_CLEANUP_INTERVAL_MIN")? {
        config.backup.cleanup_interval_min = minutes;
    }

    // Recovery registry
    if let Some(retries) = env_parse::<u32>("GEOSINK_RECOVERY_MAX_RETRIES")? {
        config.recovery.max_retries = retries;
    }
    if let Some(cleanup) = env_bool("GEOSINK_RECOVERY_CLEANUP_ON_SUCCESS")? {
        config.recovery.cleanup_on_success = cleanup;
    }
    if let Some(path) = env_string("GEOSINK_RECOVERY_PATH") {
        config.recovery.path = path;
    }

    // Scheduler
    if let Some(minutes) = env_parse::<u64>("GEOSINK_TICK_INTERVAL_MIN")? {
        config.scheduler.tick_interval_min = minutes;
    }
    if let Some(secs) = env_parse::<u64>("GEOSINK_LOCK_MAX_WAIT_SECS")? {
        config.scheduler.lock_max_wait_secs = secs;
    }

    // Server
    if let Some(addr) = env_string("GEOSINK_LISTEN_ADDR") {
        let server = config.server.get_or_insert_with(ServerConfig::default);
        server.listen_addr = addr;
    }
    if let Some(level) = env_string("GEOSINK_LOG_LEVEL") {
        let server = config.server.get_or_insert_with(ServerConfig::default);
        server.log_level = level;
    }
    if let Some(format) = env_string("GEOSINK_LOG_FORMAT") {
        let server = config.server.get_or_insert_with(ServerConfig::default);
        server.log_format = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "text" => LogFormat::Text,
            other => anyhow::bail!("invalid log format: {}. Supported: text, json", other),
        };
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_toml_config() {
        let content = r#"
            [queue]
            backend = "memory"
            host = "redis.internal"
            port = 6380
            db = 1
            gps_key = "gps:history:global"
            mobile_key = "mobile:history:global"

            [storage]
            backend = "gcs"
            gps_prefix = "gps-data/"
            mobile_prefix = "mobile-data/"

            [storage.gcs]
            bucket = "location-staging"

            [warehouse]
            path = "/var/lib/geosink/warehouse"
            dataset = "location_data"
            gps_table = "gps_records"
            mobile_table = "mobile_records"
            location = "US"
            job_timeout_secs = 120
            priority = "BATCH"
            max_bad_records = 0

            [backup]
            max_retries = 5
            retention_hours = 48
            path = "tmp/atomic-backups"
            cleanup_interval_min = 30

            [recovery]
            max_retries = 2
            cleanup_on_success = false
            path = "tmp/atomic-backups/gcs-recovery"
            pause_ms = 0

            [scheduler]
            tick_interval_min = 10
            lock_max_wait_secs = 15
            tmp_cleanup_interval_min = 30
        "#;
        let config: RuntimeConfig = toml::from_str(content).unwrap();
        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert_eq!(config.queue.port, 6380);
        assert_eq!(config.storage.backend, StorageBackend::Gcs);
        assert_eq!(config.storage.gcs.unwrap().bucket, "location-staging");
        assert_eq!(config.warehouse.job_timeout_secs, 120);
        assert_eq!(config.backup.max_retries, 5);
        assert!(!config.recovery.cleanup_on_success);
        assert_eq!(config.scheduler.tick_interval_min, 10);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: RuntimeConfig = toml::from_str("[queue]\nbackend = \"memory\"\nhost = \"h\"\nport = 1\ndb = 0\ngps_key = \"g\"\nmobile_key = \"m\"\n").unwrap();
        assert_eq!(config.backup.max_retries, BackupConfig::default().max_retries);
        assert_eq!(config.warehouse.dataset, "location_data");
    }
}
