// Health model for the admin surface
//
// Unhealthy when the queue store does not answer, the object store or
// warehouse backend is unreachable, or the oldest pending backup has been
// waiting for more than 80% of the retention window (data is at risk of
// aging out before it is recovered).

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use geosink_queue::QueueStore;
use geosink_recovery::LocalBackupStore;
use geosink_storage::{ObjectStoreAdapter, WarehouseLoader};

const BACKUP_AGE_WARN_FRACTION: f64 = 0.8;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub queue_ok: bool,
    pub storage_ok: bool,
    pub warehouse_ok: bool,
    pub backup_backlog_ok: bool,
    pub oldest_pending_backup_secs: Option<u64>,
    pub details: Vec<String>,
}

pub struct HealthCheck {
    store: Arc<dyn QueueStore>,
    adapter: ObjectStoreAdapter,
    warehouse: Arc<dyn WarehouseLoader>,
    backups: Arc<LocalBackupStore>,
}

impl HealthCheck {
    pub fn new(
        store: Arc<dyn QueueStore>,
        adapter: ObjectStoreAdapter,
        warehouse: Arc<dyn WarehouseLoader>,
        backups: Arc<LocalBackupStore>,
    ) -> Self {
        Self {
            store,
            adapter,
            warehouse,
            backups,
        }
    }

    pub async fn check(&self) -> HealthReport {
        let mut details = Vec::new();

        let queue_ok = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                details.push(format!("queue ping failed: {}", e));
                false
            }
        };

        let storage_ok = match self.adapter.status().await {
            Ok(()) => true,
            Err(e) => {
                details.push(format!("object store unreachable: {}", e));
                false
            }
        };

        let warehouse_ok = match self.warehouse.status().await {
            Ok(()) => true,
            Err(e) => {
                details.push(format!("warehouse unreachable: {}", e));
                false
            }
        };

        let warn_after = self.backups.retention().mul_f64(BACKUP_AGE_WARN_FRACTION);
        let (backup_backlog_ok, oldest_pending_backup_secs) =
            match self.backups.oldest_pending().await {
                Ok(Some(created_at)) => {
                    let age = (Utc::now() - created_at)
                        .to_std()
                        .unwrap_or_default();
                    if age > warn_after {
                        details.push(format!(
                            "oldest pending backup is {}s old (warning threshold {}s)",
                            age.as_secs(),
                            warn_after.as_secs()
                        ));
                        (false, Some(age.as_secs()))
                    } else {
                        (true, Some(age.as_secs()))
                    }
                }
                Ok(None) => (true, None),
                Err(e) => {
                    details.push(format!("backup store unreadable: {}", e));
                    (false, None)
                }
            };

        HealthReport {
            healthy: queue_ok && storage_ok && warehouse_ok && backup_backlog_ok,
            queue_ok,
            storage_ok,
            warehouse_ok,
            backup_backlog_ok,
            oldest_pending_backup_secs,
            details,
        }
    }
}
