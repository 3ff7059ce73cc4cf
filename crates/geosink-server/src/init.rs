// Initialization utilities for server mode
//
// Component wiring per configuration and logging/tracing setup. Wiring is
// one-directional: the orchestrator owns the adapters and recovery stores;
// the recovery registry holds adapter handles, never the orchestrator.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use geosink_config::{LogFormat, QueueBackend, RuntimeConfig};
use geosink_pipeline::{HealthCheck, Pipeline, Scheduler};
use geosink_queue::{
    AtomicDrainer, DistributedLock, MemoryQueueStore, QueueStore, RedisQueueStore,
};
use geosink_recovery::{LocalBackupStore, RecoveryRegistry};
use geosink_storage::{NdjsonWarehouse, ObjectStoreAdapter, WarehouseLoader};

pub(crate) struct Components {
    pub scheduler: Arc<Scheduler>,
    pub health: Arc<HealthCheck>,
}

pub(crate) async fn build_components(config: &RuntimeConfig) -> Result<Components> {
    let store: Arc<dyn QueueStore> = match config.queue.backend {
        QueueBackend::Redis => {
            info!(
                "using redis queue store at {}:{} (db {})",
                config.queue.host, config.queue.port, config.queue.db
            );
            Arc::new(
                RedisQueueStore::connect(&config.queue.redis_url())
                    .await
                    .context("Failed to connect to the queue store")?,
            )
        }
        QueueBackend::Memory => {
            info!("using in-memory queue store (development mode)");
            Arc::new(MemoryQueueStore::new())
        }
    };

    info!("using {} object storage backend", config.storage.backend);
    let adapter = ObjectStoreAdapter::from_config(&config.storage)
        .context("Failed to initialize the object store")?;

    let warehouse: Arc<dyn WarehouseLoader> = Arc::new(
        NdjsonWarehouse::from_config(&config.warehouse, adapter.clone())
            .context("Failed to initialize the warehouse loader")?,
    );
    info!(
        "warehouse dataset '{}' (tables {}, {})",
        config.warehouse.dataset, config.warehouse.gps_table, config.warehouse.mobile_table
    );

    let backups = Arc::new(LocalBackupStore::new(
        &config.backup.path,
        config.backup.max_retries,
        config.backup.retention(),
    ));
    let registry = Arc::new(RecoveryRegistry::new(
        &config.recovery.path,
        config.recovery.max_retries,
        config.recovery.cleanup_on_success,
        std::time::Duration::from_millis(config.recovery.pause_ms),
        config.storage.gps_prefix.clone(),
        config.storage.mobile_prefix.clone(),
        adapter.clone(),
        warehouse.clone(),
    ));

    let drainer = AtomicDrainer::new(
        store.clone(),
        config.queue.queue_key(true),
        config.queue.queue_key(false),
    );

    let pipeline = Arc::new(Pipeline::new(
        drainer,
        adapter.clone(),
        warehouse.clone(),
        backups.clone(),
        registry.clone(),
        config.storage.gps_prefix.clone(),
        config.storage.mobile_prefix.clone(),
        config.recovery.cleanup_on_success,
    ));

    let lock = Arc::new(DistributedLock::new(
        store.clone(),
        config.queue.lock_key(),
        config.scheduler.lock_ttl(),
    ));

    let scheduler = Arc::new(Scheduler::new(
        pipeline,
        lock,
        backups.clone(),
        registry,
        config.scheduler.tick_interval(),
        config.scheduler.lock_max_wait(),
        std::time::Duration::from_secs(config.backup.cleanup_interval_min * 60),
        std::time::Duration::from_secs(config.scheduler.tmp_cleanup_interval_min * 60),
    ));

    let health = Arc::new(HealthCheck::new(store, adapter, warehouse, backups));

    Ok(Components { scheduler, health })
}

/// Initialize tracing/logging from RuntimeConfig
pub(crate) fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let (level, format) = config
        .server
        .as_ref()
        .map(|s| (s.log_level.clone(), s.log_format))
        .unwrap_or_else(|| ("info".to_string(), LogFormat::Text));

    let env_filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => {
            registry.with(fmt::layer().json()).init();
        }
        LogFormat::Text => {
            registry.with(fmt::layer()).init();
        }
    }
}
