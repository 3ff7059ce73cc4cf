// Local backup store
//
// One file per batch whose object-store upload failed. Entries retry with
// a bounded budget: the upload failure that created the entry plus
// `max_retries` retry attempts, after which the entry goes terminal and is
// only removed by the retention sweep.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::entrydir::{self, EntryStatus};
use crate::error::RecoveryError;
use geosink_core::batch::random_suffix;
use geosink_core::{RecordKind, ValidRecord};

/// On-disk shape of one backed-up batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    pub id: String,
    pub kind: RecordKind,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub records: Vec<ValidRecord>,
    pub source_metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub status: EntryStatus,
}

#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub backup_id: String,
    pub path: PathBuf,
}

/// Result of one retry attempt.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub ok: bool,
    pub will_retry: bool,
    pub records_processed: usize,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
}

pub struct LocalBackupStore {
    dir: PathBuf,
    max_retries: u32,
    retention: Duration,
}

impl LocalBackupStore {
    pub fn new(dir: impl Into<PathBuf>, max_retries: u32, retention: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_retries,
            retention,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Persist a batch whose staging upload failed.
    pub async fn save_batch(
        &self,
        kind: RecordKind,
        records: Vec<ValidRecord>,
        source_metadata: HashMap<String, String>,
    ) -> Result<SaveOutcome, RecoveryError> {
        let now = Utc::now();
        let id = format!(
            "backup_{}_{}",
            now.format("%Y%m%d%H%M%S%3f"),
            random_suffix(6)
        );
        let entry = BackupEntry {
            id: id.clone(),
            kind,
            created_at: now,
            retry_count: 0,
            max_retries: self.max_retries,
            records,
            source_metadata,
            last_error: None,
            status: EntryStatus::Pending,
        };

        let path = entrydir::write_json_atomic(&self.dir, &id, &entry).await?;
        info!(
            "saved {} backup '{}' with {} records",
            kind,
            id,
            entry.records.len()
        );
        Ok(SaveOutcome {
            backup_id: id,
            path,
        })
    }

    /// Pending entries with retry budget left, oldest first. Entries held
    /// by another reader (`processing`) are skipped.
    pub async fn list_pending(&self) -> Result<Vec<BackupEntry>, RecoveryError> {
        let mut entries: Vec<BackupEntry> = entrydir::list_entries(&self.dir)
            .await?
            .into_iter()
            .filter(|e: &BackupEntry| {
                e.status == EntryStatus::Pending && e.retry_count < e.max_retries
            })
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    /// Creation time of the oldest entry still waiting, for health checks.
    pub async fn oldest_pending(&self) -> Result<Option<DateTime<Utc>>, RecoveryError> {
        Ok(self.list_pending().await?.first().map(|e| e.created_at))
    }

    /// Run one retry attempt: mark processing, invoke the upload function,
    /// then settle the entry according to the outcome and retry budget.
    pub async fn process<F, Fut>(
        &self,
        entry: &BackupEntry,
        upload_fn: F,
    ) -> Result<ProcessOutcome, RecoveryError>
    where
        F: FnOnce(BackupEntry) -> Fut,
        Fut: Future<Output = Result<(), String>>,
    {
        // Re-read so a concurrent attempt on the same entry is observed.
        let path = entrydir::entry_path(&self.dir, &entry.id);
        let mut current: BackupEntry = entrydir::read_json(&path).await?;
        if current.status == EntryStatus::Processing {
            warn!("backup '{}' already processing, skipping", current.id);
            return Ok(ProcessOutcome {
                ok: false,
                will_retry: true,
                records_processed: 0,
                retry_count: current.retry_count,
                max_retries: current.max_retries,
                error: Some("entry already processing".to_string()),
            });
        }

        current.status = EntryStatus::Processing;
        entrydir::write_json_atomic(&self.dir, &current.id, &current).await?;

        let records_processed = current.records.len();
        let result = upload_fn(current.clone()).await;

        match result {
            Ok(()) => {
                current.status = EntryStatus::Completed;
                current.last_error = None;
                entrydir::write_json_atomic(&self.dir, &current.id, &current).await?;
                info!(
                    "backup '{}' recovered ({} records)",
                    current.id, records_processed
                );
                Ok(ProcessOutcome {
                    ok: true,
                    will_retry: false,
                    records_processed,
                    retry_count: current.retry_count,
                    max_retries: current.max_retries,
                    error: None,
                })
            }
            Err(reason) => {
                current.retry_count += 1;
                current.last_error = Some(reason.clone());
                let terminal = current.retry_count >= current.max_retries;
                current.status = if terminal {
                    EntryStatus::Failed
                } else {
                    EntryStatus::Pending
                };
                entrydir::write_json_atomic(&self.dir, &current.id, &current).await?;

                if terminal {
                    error!(
                        "backup '{}' exhausted its {} retries and is now failed: {}",
                        current.id, current.max_retries, reason
                    );
                } else {
                    warn!(
                        "backup '{}' attempt {}/{} failed: {}",
                        current.id, current.retry_count, current.max_retries, reason
                    );
                }
                Ok(ProcessOutcome {
                    ok: false,
                    will_retry: !terminal,
                    records_processed: 0,
                    retry_count: current.retry_count,
                    max_retries: current.max_retries,
                    error: Some(reason),
                })
            }
        }
    }

    /// Remove an entry. Called only after a successful stage and load.
    pub async fn delete(&self, backup_id: &str) -> Result<(), RecoveryError> {
        entrydir::remove_entry(&self.dir, backup_id).await
    }

    /// Sweep terminal entries older than the cutoff.
    pub async fn cleanup_completed(&self, older_than: Duration) -> Result<usize, RecoveryError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        let entries: Vec<BackupEntry> = entrydir::list_entries(&self.dir).await?;

        let mut removed = 0;
        for entry in entries {
            if entry.status.is_terminal() && entry.created_at < cutoff {
                entrydir::remove_entry(&self.dir, &entry.id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("cleaned up {} terminal backup entries", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosink_core::GpsRecord;

    fn gps_records(n: usize) -> Vec<ValidRecord> {
        (0..n)
            .map(|i| {
                ValidRecord::Gps(GpsRecord {
                    device_id: format!("d{}", i),
                    lat: 1.0,
                    lng: 2.0,
                    timestamp: "2025-01-15T10:00:00.000Z".to_string(),
                    processed_at: None,
                    processing_id: None,
                })
            })
            .collect()
    }

    fn store(dir: &Path) -> LocalBackupStore {
        LocalBackupStore::new(dir, 3, Duration::from_secs(24 * 3600))
    }

    #[tokio::test]
    async fn saved_batch_rehydrates_equal_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let saved = store
            .save_batch(RecordKind::Gps, gps_records(3), HashMap::new())
            .await
            .unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        let entry = &pending[0];
        assert_eq!(entry.id, saved.backup_id);
        assert_eq!(entry.records, gps_records(3));
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.status, EntryStatus::Pending);
    }

    #[tokio::test]
    async fn successful_process_marks_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .save_batch(RecordKind::Gps, gps_records(2), HashMap::new())
            .await
            .unwrap();

        let entry = store.list_pending().await.unwrap().remove(0);
        let outcome = store.process(&entry, |_| async { Ok(()) }).await.unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.records_processed, 2);

        // Completed entries are no longer pending.
        assert!(store.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn entry_fails_after_exactly_max_retries_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBackupStore::new(dir.path(), 2, Duration::from_secs(3600));
        store
            .save_batch(RecordKind::Mobile, gps_records(1), HashMap::new())
            .await
            .unwrap();

        // Attempt 1: retry budget left.
        let entry = store.list_pending().await.unwrap().remove(0);
        let outcome = store
            .process(&entry, |_| async { Err("outage".to_string()) })
            .await
            .unwrap();
        assert!(!outcome.ok);
        assert!(outcome.will_retry);
        assert_eq!(outcome.retry_count, 1);

        // Attempt 2 == max_retries: terminal, never earlier, never later.
        let entry = store.list_pending().await.unwrap().remove(0);
        let outcome = store
            .process(&entry, |_| async { Err("outage".to_string()) })
            .await
            .unwrap();
        assert!(!outcome.will_retry);
        assert_eq!(outcome.retry_count, 2);
        assert!(store.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn processing_entries_are_skipped_by_other_readers() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .save_batch(RecordKind::Gps, gps_records(1), HashMap::new())
            .await
            .unwrap();

        let mut entry = store.list_pending().await.unwrap().remove(0);
        entry.status = EntryStatus::Processing;
        entrydir::write_json_atomic(store.dir(), &entry.id, &entry)
            .await
            .unwrap();

        assert!(store.list_pending().await.unwrap().is_empty());
        let outcome = store.process(&entry, |_| async { Ok(()) }).await.unwrap();
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("already processing"));
    }

    #[tokio::test]
    async fn pending_entries_come_back_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let first = store
            .save_batch(RecordKind::Gps, gps_records(1), HashMap::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store
            .save_batch(RecordKind::Gps, gps_records(1), HashMap::new())
            .await
            .unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending[0].id, first.backup_id);
        assert_eq!(pending[1].id, second.backup_id);
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_terminal_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .save_batch(RecordKind::Gps, gps_records(1), HashMap::new())
            .await
            .unwrap();

        let mut entry = store.list_pending().await.unwrap().remove(0);
        entry.status = EntryStatus::Completed;
        entry.created_at = Utc::now() - chrono::Duration::hours(48);
        entrydir::write_json_atomic(store.dir(), &entry.id, &entry)
            .await
            .unwrap();

        let removed = store
            .cleanup_completed(Duration::from_secs(24 * 3600))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn delete_after_success_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let saved = store
            .save_batch(RecordKind::Gps, gps_records(1), HashMap::new())
            .await
            .unwrap();
        store.delete(&saved.backup_id).await.unwrap();
        assert!(store.list_pending().await.unwrap().is_empty());
        assert!(!saved.path.exists());
    }
}
