// Recovery registry
//
// Tracks staged objects whose warehouse load has not succeeded yet, plus
// discovery of orphans: objects sitting in the store with no registry
// entry, left behind by a tick that crashed between upload and registry
// write. Registered entries are processed before orphans, and a short
// pause separates loads so a recovery sweep cannot burst the warehouse.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::entrydir::{self, EntryStatus};
use crate::error::RecoveryError;
use geosink_core::batch::random_suffix;
use geosink_core::{to_ndjson, RecordKind, ValidRecord};
use geosink_storage::{
    JobState, LoadResult, ObjectStoreAdapter, StagedObject, WarehouseError, WarehouseLoader,
};

/// On-disk shape of one registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub status: EntryStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub object_name: String,
    pub object_uri: String,
    pub metadata: HashMap<String, String>,
    /// Fallback when the staged object has disappeared from the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_records: Option<Vec<ValidRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<LoadResult>,
}

/// Outcome of one processed entry or orphan.
#[derive(Debug, Clone)]
pub struct RecoveryResult {
    pub object_name: String,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct ProcessAllOutcome {
    pub processed: usize,
    pub failed: usize,
    pub results: Vec<RecoveryResult>,
}

pub struct RecoveryRegistry {
    dir: PathBuf,
    max_retries: u32,
    cleanup_on_success: bool,
    pause: Duration,
    gps_prefix: String,
    mobile_prefix: String,
    adapter: ObjectStoreAdapter,
    warehouse: Arc<dyn WarehouseLoader>,
}

impl RecoveryRegistry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dir: impl Into<PathBuf>,
        max_retries: u32,
        cleanup_on_success: bool,
        pause: Duration,
        gps_prefix: impl Into<String>,
        mobile_prefix: impl Into<String>,
        adapter: ObjectStoreAdapter,
        warehouse: Arc<dyn WarehouseLoader>,
    ) -> Self {
        Self {
            dir: dir.into(),
            max_retries,
            cleanup_on_success,
            pause,
            gps_prefix: gps_prefix.into(),
            mobile_prefix: mobile_prefix.into(),
            adapter,
            warehouse,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn infer_kind(&self, object_name: &str, metadata: &HashMap<String, String>) -> Option<RecordKind> {
        if object_name.starts_with(&self.gps_prefix) {
            Some(RecordKind::Gps)
        } else if object_name.starts_with(&self.mobile_prefix) {
            Some(RecordKind::Mobile)
        } else {
            metadata.get("dataType").and_then(|v| v.parse().ok())
        }
    }

    /// Record a staged object whose load failed.
    pub async fn register(
        &self,
        object_name: &str,
        object_uri: &str,
        metadata: HashMap<String, String>,
        original_records: Option<Vec<ValidRecord>>,
    ) -> Result<String, RecoveryError> {
        self.register_with_state(object_name, object_uri, metadata, original_records, 0, None)
            .await
    }

    async fn register_with_state(
        &self,
        object_name: &str,
        object_uri: &str,
        metadata: HashMap<String, String>,
        original_records: Option<Vec<ValidRecord>>,
        retry_count: u32,
        last_error: Option<String>,
    ) -> Result<String, RecoveryError> {
        let now = Utc::now();
        let id = format!(
            "gcs_recovery_{}_{}",
            now.format("%Y%m%d%H%M%S%3f"),
            random_suffix(6)
        );
        let entry = RegistryEntry {
            id: id.clone(),
            created_at: now,
            status: EntryStatus::Pending,
            retry_count,
            max_retries: self.max_retries,
            object_name: object_name.to_string(),
            object_uri: object_uri.to_string(),
            metadata,
            original_records,
            last_error,
            processed_at: None,
            result: None,
        };
        entrydir::write_json_atomic(&self.dir, &id, &entry).await?;
        info!("registered '{}' for load recovery as '{}'", object_name, id);
        Ok(id)
    }

    pub async fn list_pending(&self) -> Result<Vec<RegistryEntry>, RecoveryError> {
        let mut entries: Vec<RegistryEntry> = entrydir::list_entries(&self.dir)
            .await?
            .into_iter()
            .filter(|e: &RegistryEntry| {
                e.status == EntryStatus::Pending && e.retry_count < e.max_retries
            })
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    /// Objects under either kind prefix with no registry entry of any
    /// status: survivors of a crashed tick.
    pub async fn find_orphans(&self) -> Result<Vec<StagedObject>, RecoveryError> {
        let registered: HashSet<String> = entrydir::list_entries::<RegistryEntry>(&self.dir)
            .await?
            .into_iter()
            .map(|e| e.object_name)
            .collect();

        let mut orphans = Vec::new();
        for prefix in [&self.gps_prefix, &self.mobile_prefix] {
            for object in self.adapter.list_by_prefix(prefix).await? {
                if !registered.contains(&object.name) {
                    orphans.push(object);
                }
            }
        }
        Ok(orphans)
    }

    /// Process registered entries first, then discovered orphans.
    pub async fn process_all(&self) -> Result<ProcessAllOutcome, RecoveryError> {
        let mut outcome = ProcessAllOutcome::default();

        let entries = self.list_pending().await?;
        for entry in entries {
            let result = self.process_entry(&entry).await?;
            if result.ok {
                outcome.processed += 1;
            } else {
                outcome.failed += 1;
            }
            outcome.results.push(result);
            self.pause_between_loads().await;
        }

        let orphans = self.find_orphans().await?;
        if !orphans.is_empty() {
            info!("discovered {} orphan objects", orphans.len());
        }
        for orphan in orphans {
            let result = self.process_orphan(&orphan).await?;
            if result.ok {
                outcome.processed += 1;
            } else {
                outcome.failed += 1;
            }
            outcome.results.push(result);
            self.pause_between_loads().await;
        }

        Ok(outcome)
    }

    async fn pause_between_loads(&self) {
        if !self.pause.is_zero() {
            tokio::time::sleep(self.pause).await;
        }
    }

    /// A duplicate job id means this batch was already submitted once; the
    /// load only counts as done if that job finished clean.
    async fn resolve_duplicate(&self, err: &WarehouseError) -> Option<LoadResult> {
        if let WarehouseError::Duplicate { job_id } = err {
            match self.warehouse.job_status(job_id).await {
                Ok(status) if status.state == JobState::Done && status.errors.is_empty() => {
                    Some(LoadResult {
                        job_id: job_id.clone(),
                        rows_written: 0,
                        bytes_read: 0,
                    })
                }
                _ => None,
            }
        } else {
            None
        }
    }

    async fn process_entry(&self, entry: &RegistryEntry) -> Result<RecoveryResult, RecoveryError> {
        let path = entrydir::entry_path(&self.dir, &entry.id);
        let mut current: RegistryEntry = entrydir::read_json(&path).await?;
        if current.status == EntryStatus::Processing {
            warn!("registry entry '{}' already processing, skipping", current.id);
            return Ok(RecoveryResult {
                object_name: current.object_name,
                ok: false,
                error: Some("entry already processing".to_string()),
            });
        }

        current.status = EntryStatus::Processing;
        entrydir::write_json_atomic(&self.dir, &current.id, &current).await?;

        let kind = match self.infer_kind(&current.object_name, &current.metadata) {
            Some(kind) => kind,
            None => {
                return self
                    .settle_failure(current, "cannot infer record kind".to_string())
                    .await;
            }
        };

        let load_result = match self.adapter.exists(&current.object_name).await {
            Ok(true) => self
                .warehouse
                .load_from_uri(&current.object_uri, kind, &current.metadata)
                .await,
            Ok(false) => self.reupload_and_load(&current, kind).await,
            Err(e) => Err(WarehouseError::Source(e)),
        };

        match load_result {
            Ok(result) => self.settle_success(current, result).await,
            Err(err) => {
                if let Some(result) = self.resolve_duplicate(&err).await {
                    return self.settle_success(current, result).await;
                }
                self.settle_failure(current, err.to_string()).await
            }
        }
    }

    /// The staged object vanished: re-stage from the preserved records,
    /// then load.
    async fn reupload_and_load(
        &self,
        entry: &RegistryEntry,
        kind: RecordKind,
    ) -> Result<LoadResult, WarehouseError> {
        let records = entry.original_records.as_ref().ok_or_else(|| {
            WarehouseError::Source(geosink_storage::StorageError::NotFound(format!(
                "object '{}' gone and no original records preserved",
                entry.object_name
            )))
        })?;

        warn!(
            "object '{}' missing, re-staging {} preserved records",
            entry.object_name,
            records.len()
        );
        let payload = to_ndjson(records).map_err(|e| {
            WarehouseError::Source(geosink_storage::StorageError::Malformed(e.to_string()))
        })?;
        let outcome = self
            .adapter
            .upload_ndjson(&payload, &entry.object_name, &entry.metadata)
            .await
            .map_err(WarehouseError::Source)?;

        self.warehouse
            .load_from_uri(&outcome.uri, kind, &entry.metadata)
            .await
    }

    async fn settle_success(
        &self,
        mut entry: RegistryEntry,
        result: LoadResult,
    ) -> Result<RecoveryResult, RecoveryError> {
        entry.status = EntryStatus::Completed;
        entry.processed_at = Some(Utc::now());
        entry.result = Some(result);
        entry.last_error = None;
        entrydir::write_json_atomic(&self.dir, &entry.id, &entry).await?;

        if self.cleanup_on_success {
            if let Err(e) = self.adapter.delete(&entry.object_name).await {
                warn!(
                    "loaded '{}' but could not delete the staged object: {}",
                    entry.object_name, e
                );
            }
        }

        info!("registry entry '{}' completed", entry.id);
        Ok(RecoveryResult {
            object_name: entry.object_name,
            ok: true,
            error: None,
        })
    }

    async fn settle_failure(
        &self,
        mut entry: RegistryEntry,
        reason: String,
    ) -> Result<RecoveryResult, RecoveryError> {
        entry.retry_count += 1;
        entry.last_error = Some(reason.clone());
        let terminal = entry.retry_count >= entry.max_retries;
        entry.status = if terminal {
            EntryStatus::Failed
        } else {
            EntryStatus::Pending
        };
        entrydir::write_json_atomic(&self.dir, &entry.id, &entry).await?;

        if terminal {
            error!(
                "registry entry '{}' exhausted its {} retries and is now failed: {}",
                entry.id, entry.max_retries, reason
            );
        } else {
            warn!(
                "registry entry '{}' attempt {}/{} failed: {}",
                entry.id, entry.retry_count, entry.max_retries, reason
            );
        }
        Ok(RecoveryResult {
            object_name: entry.object_name,
            ok: false,
            error: Some(reason),
        })
    }

    async fn process_orphan(&self, orphan: &StagedObject) -> Result<RecoveryResult, RecoveryError> {
        let kind = match self.infer_kind(&orphan.name, &orphan.metadata) {
            Some(kind) => kind,
            None => {
                warn!("orphan '{}' matches no known prefix, leaving in place", orphan.name);
                return Ok(RecoveryResult {
                    object_name: orphan.name.clone(),
                    ok: false,
                    error: Some("unknown prefix".to_string()),
                });
            }
        };

        let load_result = self
            .warehouse
            .load_from_uri(&orphan.uri, kind, &orphan.metadata)
            .await;

        match load_result {
            Ok(_) => {
                if self.cleanup_on_success {
                    if let Err(e) = self.adapter.delete(&orphan.name).await {
                        warn!("loaded orphan '{}' but could not delete it: {}", orphan.name, e);
                    }
                }
                info!("orphan '{}' loaded", orphan.name);
                Ok(RecoveryResult {
                    object_name: orphan.name.clone(),
                    ok: true,
                    error: None,
                })
            }
            Err(err) => {
                if let Some(_result) = self.resolve_duplicate(&err).await {
                    if self.cleanup_on_success {
                        let _ = self.adapter.delete(&orphan.name).await;
                    }
                    return Ok(RecoveryResult {
                        object_name: orphan.name.clone(),
                        ok: true,
                        error: None,
                    });
                }
                // Register the orphan so further attempts get bounded retry
                // bookkeeping instead of rediscovery forever.
                self.register_with_state(
                    &orphan.name,
                    &orphan.uri,
                    orphan.metadata.clone(),
                    None,
                    1,
                    Some(err.to_string()),
                )
                .await?;
                Ok(RecoveryResult {
                    object_name: orphan.name.clone(),
                    ok: false,
                    error: Some(err.to_string()),
                })
            }
        }
    }

    /// Sweep completed entries older than the cutoff; terminal failures are
    /// retained seven times as long before removal.
    pub async fn cleanup(&self, completed_older_than: Duration) -> Result<usize, RecoveryError> {
        let now = Utc::now();
        let completed_cutoff = now
            - chrono::Duration::from_std(completed_older_than).unwrap_or(chrono::Duration::zero());
        let failed_cutoff = now
            - chrono::Duration::from_std(completed_older_than * 7)
                .unwrap_or(chrono::Duration::zero());

        let entries: Vec<RegistryEntry> = entrydir::list_entries(&self.dir).await?;
        let mut removed = 0;
        for entry in entries {
            let expired = match entry.status {
                EntryStatus::Completed => entry.created_at < completed_cutoff,
                EntryStatus::Failed => entry.created_at < failed_cutoff,
                _ => false,
            };
            if expired {
                entrydir::remove_entry(&self.dir, &entry.id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("cleaned up {} registry entries", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use geosink_core::GpsRecord;
    use geosink_storage::JobStatus;
    use std::sync::Mutex;

    /// Scriptable warehouse: fails the first `fail_first` loads, then
    /// succeeds; remembers every submitted job id.
    struct ScriptedWarehouse {
        fail_first: Mutex<u32>,
        submitted: Mutex<Vec<String>>,
        completed: Mutex<HashMap<String, JobStatus>>,
    }

    impl ScriptedWarehouse {
        fn new(fail_first: u32) -> Self {
            Self {
                fail_first: Mutex::new(fail_first),
                submitted: Mutex::new(Vec::new()),
                completed: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl WarehouseLoader for ScriptedWarehouse {
        async fn load_from_uri(
            &self,
            uri: &str,
            kind: RecordKind,
            metadata: &HashMap<String, String>,
        ) -> Result<LoadResult, WarehouseError> {
            let processing_id = metadata
                .get("processingId")
                .cloned()
                .unwrap_or_else(|| uri.to_string());
            let job_id = geosink_storage::derive_job_id(kind, &processing_id);
            self.submitted.lock().unwrap().push(job_id.clone());

            {
                let mut remaining = self.fail_first.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(WarehouseError::Unavailable("scripted outage".to_string()));
                }
            }

            let mut completed = self.completed.lock().unwrap();
            if completed.contains_key(&job_id) {
                return Err(WarehouseError::Duplicate { job_id });
            }
            completed.insert(
                job_id.clone(),
                JobStatus {
                    state: JobState::Done,
                    errors: Vec::new(),
                },
            );
            Ok(LoadResult {
                job_id,
                rows_written: 1,
                bytes_read: 10,
            })
        }

        async fn job_status(&self, job_id: &str) -> Result<JobStatus, WarehouseError> {
            self.completed
                .lock()
                .unwrap()
                .get(job_id)
                .cloned()
                .ok_or_else(|| WarehouseError::UnknownJob(job_id.to_string()))
        }
    }

    fn memory_adapter() -> ObjectStoreAdapter {
        let op = opendal::Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        ObjectStoreAdapter::new(op)
    }

    fn registry(
        dir: &Path,
        adapter: ObjectStoreAdapter,
        warehouse: Arc<dyn WarehouseLoader>,
    ) -> RecoveryRegistry {
        RecoveryRegistry::new(
            dir,
            3,
            true,
            Duration::ZERO,
            "gps-data/",
            "mobile-data/",
            adapter,
            warehouse,
        )
    }

    fn gps_records() -> Vec<ValidRecord> {
        vec![ValidRecord::Gps(GpsRecord {
            device_id: "d1".to_string(),
            lat: 1.0,
            lng: 2.0,
            timestamp: "2025-01-15T10:00:00.000Z".to_string(),
            processed_at: None,
            processing_id: Some("gps_20250115100000_abc".to_string()),
        })]
    }

    fn staging_metadata() -> HashMap<String, String> {
        HashMap::from([
            ("processingId".to_string(), "gps_20250115100000_abc".to_string()),
            ("dataType".to_string(), "gps".to_string()),
        ])
    }

    async fn stage_object(adapter: &ObjectStoreAdapter) -> (String, String) {
        let name = "gps-data/gps_20250115100000_abc.json".to_string();
        let payload = to_ndjson(&gps_records()).unwrap();
        let outcome = adapter
            .upload_ndjson(&payload, &name, &staging_metadata())
            .await
            .unwrap();
        (name, outcome.uri)
    }

    #[tokio::test]
    async fn registered_entry_completes_and_object_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = memory_adapter();
        let warehouse = Arc::new(ScriptedWarehouse::new(0));
        let registry = registry(dir.path(), adapter.clone(), warehouse);

        let (name, uri) = stage_object(&adapter).await;
        registry
            .register(&name, &uri, staging_metadata(), Some(gps_records()))
            .await
            .unwrap();

        let outcome = registry.process_all().await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.failed, 0);

        // Entry is completed and the staged object deleted.
        assert!(registry.list_pending().await.unwrap().is_empty());
        assert!(!adapter.exists(&name).await.unwrap());
    }

    #[tokio::test]
    async fn missing_object_falls_back_to_original_records() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = memory_adapter();
        let warehouse = Arc::new(ScriptedWarehouse::new(0));
        let registry = registry(dir.path(), adapter.clone(), warehouse);

        let (name, uri) = stage_object(&adapter).await;
        registry
            .register(&name, &uri, staging_metadata(), Some(gps_records()))
            .await
            .unwrap();
        adapter.delete(&name).await.unwrap();

        let outcome = registry.process_all().await.unwrap();
        assert_eq!(outcome.processed, 1);
    }

    #[tokio::test]
    async fn missing_object_without_originals_consumes_a_retry() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = memory_adapter();
        let warehouse = Arc::new(ScriptedWarehouse::new(0));
        let registry = registry(dir.path(), adapter.clone(), warehouse);

        let (name, uri) = stage_object(&adapter).await;
        registry
            .register(&name, &uri, staging_metadata(), None)
            .await
            .unwrap();
        adapter.delete(&name).await.unwrap();

        let outcome = registry.process_all().await.unwrap();
        assert_eq!(outcome.failed, 1);
        let pending = registry.list_pending().await.unwrap();
        assert_eq!(pending[0].retry_count, 1);
    }

    #[tokio::test]
    async fn entry_goes_terminal_after_max_retries() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = memory_adapter();
        let warehouse = Arc::new(ScriptedWarehouse::new(10));
        let registry = RecoveryRegistry::new(
            dir.path(),
            2,
            true,
            Duration::ZERO,
            "gps-data/",
            "mobile-data/",
            adapter.clone(),
            warehouse,
        );

        let (name, uri) = stage_object(&adapter).await;
        registry
            .register(&name, &uri, staging_metadata(), Some(gps_records()))
            .await
            .unwrap();

        let first = registry.process_all().await.unwrap();
        assert_eq!(first.failed, 1);
        let second = registry.process_all().await.unwrap();
        assert_eq!(second.failed, 1);

        // Exhausted: no longer pending, never retried again. The object
        // itself is left in place but is not an orphan (entry retained).
        assert!(registry.list_pending().await.unwrap().is_empty());
        let third = registry.process_all().await.unwrap();
        assert_eq!(third.processed + third.failed, 0);
    }

    #[tokio::test]
    async fn orphans_are_discovered_loaded_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = memory_adapter();
        let warehouse = Arc::new(ScriptedWarehouse::new(0));
        let registry = registry(dir.path(), adapter.clone(), warehouse);

        // Staged object with no registry entry: a crashed tick's survivor.
        let (name, _uri) = stage_object(&adapter).await;

        let orphans = registry.find_orphans().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].name, name);

        let outcome = registry.process_all().await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert!(!adapter.exists(&name).await.unwrap());
        assert!(registry.find_orphans().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replaying_a_completed_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = memory_adapter();
        let warehouse = Arc::new(ScriptedWarehouse::new(0));
        let registry = RecoveryRegistry::new(
            dir.path(),
            3,
            false, // keep the object so the second pass can re-load it
            Duration::ZERO,
            "gps-data/",
            "mobile-data/",
            adapter.clone(),
            warehouse.clone(),
        );

        let (name, uri) = stage_object(&adapter).await;
        registry
            .register(&name, &uri, staging_metadata(), Some(gps_records()))
            .await
            .unwrap();
        registry.process_all().await.unwrap();

        // Re-register the same object (as after a crash that lost the
        // completed entry) and replay: the duplicate job id resolves to the
        // already-done job instead of a second commit.
        registry
            .register(&name, &uri, staging_metadata(), Some(gps_records()))
            .await
            .unwrap();
        let outcome = registry.process_all().await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(warehouse.completed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_retains_failed_entries_longer() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = memory_adapter();
        let warehouse = Arc::new(ScriptedWarehouse::new(0));
        let registry = registry(dir.path(), adapter.clone(), warehouse);

        let (name, uri) = stage_object(&adapter).await;
        let id = registry
            .register(&name, &uri, staging_metadata(), None)
            .await
            .unwrap();

        // Hand-age a completed and a failed entry past the completed cutoff.
        let path = entrydir::entry_path(registry.dir(), &id);
        let mut entry: RegistryEntry = entrydir::read_json(&path).await.unwrap();
        entry.status = EntryStatus::Completed;
        entry.created_at = Utc::now() - chrono::Duration::hours(48);
        entrydir::write_json_atomic(registry.dir(), &entry.id, &entry)
            .await
            .unwrap();

        let failed_id = registry
            .register(&name, &uri, staging_metadata(), None)
            .await
            .unwrap();
        let path = entrydir::entry_path(registry.dir(), &failed_id);
        let mut failed: RegistryEntry = entrydir::read_json(&path).await.unwrap();
        failed.status = EntryStatus::Failed;
        failed.created_at = Utc::now() - chrono::Duration::hours(48);
        entrydir::write_json_atomic(registry.dir(), &failed.id, &failed)
            .await
            .unwrap();

        let removed = registry.cleanup(Duration::from_secs(24 * 3600)).await.unwrap();
        assert_eq!(removed, 1); // completed removed, failed retained 7x
    }
}
