// Configuration validation
//
// Catches wiring mistakes before any component is constructed.

use crate::{RuntimeConfig, StorageBackend};
use anyhow::Result;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    // Queue keys must be distinct or the drainer would clear one list twice.
    if config.queue.queue_key(true) == config.queue.queue_key(false) {
        anyhow::bail!("queue gps_key and mobile_key must differ");
    }
    if config.queue.gps_key.is_empty() || config.queue.mobile_key.is_empty() {
        anyhow::bail!("queue keys must not be empty");
    }

    // Prefixes separate the two kinds in the object store and drive orphan
    // kind inference; they must be distinct and well-formed.
    if config.storage.gps_prefix.is_empty() || config.storage.mobile_prefix.is_empty() {
        anyhow::bail!("storage prefixes must not be empty");
    }
    if config.storage.gps_prefix == config.storage.mobile_prefix {
        anyhow::bail!("storage gps_prefix and mobile_prefix must differ");
    }
    if !config.storage.gps_prefix.ends_with('/') || !config.storage.mobile_prefix.ends_with('/') {
        anyhow::bail!("storage prefixes must end with '/'");
    }

    match config.storage.backend {
        StorageBackend::Fs => {
            if config.storage.fs.is_none() {
                anyhow::bail!("storage.fs configuration required for fs backend");
            }
        }
        StorageBackend::S3 => {
            let s3 = config
                .storage
                .s3
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("storage.s3 configuration required for s3 backend"))?;
            if s3.bucket.is_empty() {
                anyhow::bail!("storage.s3.bucket must not be empty");
            }
        }
        StorageBackend::Gcs => {
            let gcs = config
                .storage
                .gcs
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("storage.gcs configuration required for gcs backend"))?;
            if gcs.bucket.is_empty() {
                anyhow::bail!("storage.gcs.bucket must not be empty");
            }
        }
    }

    if config.warehouse.dataset.is_empty()
        || config.warehouse.gps_table.is_empty()
        || config.warehouse.mobile_table.is_empty()
    {
        anyhow::bail!("warehouse dataset and table names must not be empty");
    }
    if config.warehouse.gps_table == config.warehouse.mobile_table {
        anyhow::bail!("warehouse gps_table and mobile_table must differ");
    }
    if config.warehouse.job_timeout_secs == 0 {
        anyhow::bail!("warehouse.job_timeout_secs must be positive");
    }

    if config.backup.path.is_empty() || config.recovery.path.is_empty() {
        anyhow::bail!("backup and recovery paths must not be empty");
    }
    if config.backup.retention_hours == 0 {
        anyhow::bail!("backup.retention_hours must be positive");
    }

    if config.scheduler.tick_interval_min == 0 {
        anyhow::bail!("scheduler.tick_interval_min must be positive");
    }

    Ok(())
}
