// Pipeline orchestrator
//
// Per tick, inside the orchestrator lock:
//   1. retry local backups (stale batches get ahead of fresh ones)
//   2. run registry recovery, orphan discovery included
//   3. atomic drain of both queue keys
//   4. parallel per-kind dispatch: validate, project, stage, load
// Failures write aside: a failed upload lands in the local backup store, a
// failed load lands in the registry with the original records preserved. A
// tick never propagates an error to the scheduler; it returns a structured
// result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use metrics::{counter, histogram};
use tracing::{error, info, warn};

use geosink_core::{to_ndjson, validate_batch, DrainedBatch, RecordKind, ValidRecord};
use geosink_queue::AtomicDrainer;
use geosink_recovery::{BackupEntry, LocalBackupStore, RecoveryRegistry};
use geosink_storage::{ObjectStoreAdapter, WarehouseError, WarehouseLoader};

const SOURCE_LABEL: &str = "geosink-pipeline";

/// Failure stage labels surfaced in tick results.
const STAGE_UPLOAD_FAILED: &str = "gcs_upload_failed";
const STAGE_LOAD_FAILED: &str = "warehouse_load_failed";
const STAGE_BACKUP_WRITE_FAILED: &str = "backup_write_failed";

/// Per-kind result of one dispatch path.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub kind: RecordKind,
    pub success: bool,
    /// Failure stage label when `success` is false.
    pub stage: Option<&'static str>,
    pub records_extracted: usize,
    pub records_invalid: usize,
    pub records_loaded: usize,
    pub backup_created: bool,
    pub registry_entry_created: bool,
    pub error: Option<String>,
}

impl DispatchResult {
    fn empty(kind: RecordKind) -> Self {
        Self {
            kind,
            success: true,
            stage: None,
            records_extracted: 0,
            records_invalid: 0,
            records_loaded: 0,
            backup_created: false,
            registry_entry_created: false,
            error: None,
        }
    }
}

/// Structured result of one tick.
#[derive(Debug)]
pub struct TickResult {
    pub success: bool,
    pub records_processed: usize,
    pub backups_processed: usize,
    pub backups_failed: usize,
    pub recovery_processed: usize,
    pub recovery_failed: usize,
    pub gps: DispatchResult,
    pub mobile: DispatchResult,
    pub extraction_ms: u64,
    pub total_ms: u64,
    pub error: Option<String>,
}

pub struct Pipeline {
    drainer: AtomicDrainer,
    adapter: ObjectStoreAdapter,
    warehouse: Arc<dyn WarehouseLoader>,
    backups: Arc<LocalBackupStore>,
    registry: Arc<RecoveryRegistry>,
    gps_prefix: String,
    mobile_prefix: String,
    cleanup_on_success: bool,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        drainer: AtomicDrainer,
        adapter: ObjectStoreAdapter,
        warehouse: Arc<dyn WarehouseLoader>,
        backups: Arc<LocalBackupStore>,
        registry: Arc<RecoveryRegistry>,
        gps_prefix: impl Into<String>,
        mobile_prefix: impl Into<String>,
        cleanup_on_success: bool,
    ) -> Self {
        Self {
            drainer,
            adapter,
            warehouse,
            backups,
            registry,
            gps_prefix: gps_prefix.into(),
            mobile_prefix: mobile_prefix.into(),
            cleanup_on_success,
        }
    }

    fn prefix_for(&self, kind: RecordKind) -> &str {
        match kind {
            RecordKind::Gps => &self.gps_prefix,
            RecordKind::Mobile => &self.mobile_prefix,
        }
    }

    /// Run one full tick. Never returns an error: every failure mode is
    /// folded into the structured result.
    pub async fn run_tick(&self) -> TickResult {
        let started = Instant::now();

        // 1. Stale batches first.
        let (backups_processed, backups_failed) = self.process_backups().await;

        // 2. Staged-but-unloaded objects, then orphans.
        let (recovery_processed, recovery_failed) = match self.registry.process_all().await {
            Ok(outcome) => (outcome.processed, outcome.failed),
            Err(e) => {
                error!("registry sweep failed: {}", e);
                (0, 1)
            }
        };

        // 3. Atomic drain of both kinds.
        let summary = match self.drainer.extract_all().await {
            Ok(summary) => summary,
            Err(e) => {
                error!("atomic drain failed: {}", e);
                let total_ms = started.elapsed().as_millis() as u64;
                counter!("geosink.tick.drain_failures", 1);
                return TickResult {
                    success: false,
                    records_processed: 0,
                    backups_processed,
                    backups_failed,
                    recovery_processed,
                    recovery_failed,
                    gps: DispatchResult::empty(RecordKind::Gps),
                    mobile: DispatchResult::empty(RecordKind::Mobile),
                    extraction_ms: 0,
                    total_ms,
                    error: Some(e.to_string()),
                };
            }
        };
        let extraction_ms = summary.extraction_ms;

        // 4. Both kinds dispatch concurrently; an error on one path never
        // aborts the sibling.
        let (gps, mobile) = tokio::join!(
            self.dispatch(summary.gps),
            self.dispatch(summary.mobile)
        );

        let records_processed = gps.records_loaded + mobile.records_loaded;
        let success = gps.success && mobile.success;
        let total_ms = started.elapsed().as_millis() as u64;

        counter!("geosink.tick.records_loaded", records_processed as u64);
        counter!(
            "geosink.tick.records_invalid",
            (gps.records_invalid + mobile.records_invalid) as u64
        );
        histogram!("geosink.tick.extraction_ms", extraction_ms as f64);
        histogram!("geosink.tick.total_ms", total_ms as f64);

        info!(
            "tick done in {}ms: {} loaded, {} backups retried ({} failed), {} recovered ({} failed)",
            total_ms,
            records_processed,
            backups_processed,
            backups_failed,
            recovery_processed,
            recovery_failed
        );

        TickResult {
            success,
            records_processed,
            backups_processed,
            backups_failed,
            recovery_processed,
            recovery_failed,
            gps,
            mobile,
            extraction_ms,
            total_ms,
            error: None,
        }
    }

    /// Retry every pending local backup through stage-and-load. A backup
    /// that stages but fails to load is handed over to the registry, so the
    /// batch keeps exactly one durable owner.
    async fn process_backups(&self) -> (usize, usize) {
        let pending = match self.backups.list_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                error!("listing pending backups failed: {}", e);
                return (0, 1);
            }
        };

        let mut processed = 0;
        let mut failed = 0;
        for entry in pending {
            let id = entry.id.clone();
            let result = self
                .backups
                .process(&entry, |entry| self.recover_backup(entry))
                .await;

            match result {
                Ok(outcome) if outcome.ok => {
                    processed += 1;
                    if let Err(e) = self.backups.delete(&id).await {
                        warn!("recovered backup '{}' but could not delete it: {}", id, e);
                    }
                }
                Ok(_) => failed += 1,
                Err(e) => {
                    error!("backup '{}' processing error: {}", id, e);
                    failed += 1;
                }
            }
        }
        (processed, failed)
    }

    /// Stage-and-load for one backed-up batch.
    async fn recover_backup(&self, entry: BackupEntry) -> Result<(), String> {
        let processing_id = entry
            .source_metadata
            .get("processingId")
            .cloned()
            .unwrap_or_else(|| entry.id.clone());
        let object_name = format!("{}{}.json", self.prefix_for(entry.kind), processing_id);

        let payload = to_ndjson(&entry.records).map_err(|e| e.to_string())?;
        let mut metadata = entry.source_metadata.clone();
        metadata.insert("dataType".to_string(), entry.kind.as_str().to_string());
        metadata.insert("recordCount".to_string(), entry.records.len().to_string());
        metadata.insert("processingId".to_string(), processing_id);

        let outcome = self
            .adapter
            .upload_ndjson(&payload, &object_name, &metadata)
            .await
            .map_err(|e| e.to_string())?;

        match self
            .warehouse
            .load_from_uri(&outcome.uri, entry.kind, &metadata)
            .await
        {
            Ok(_) => {
                if self.cleanup_on_success {
                    if let Err(e) = self.adapter.delete(&object_name).await {
                        warn!("loaded '{}' but could not delete it: {}", object_name, e);
                    }
                }
                Ok(())
            }
            Err(err) if err.is_duplicate() => Ok(()),
            Err(err) => {
                // Staged but unloaded: the registry takes over from here.
                warn!(
                    "backup '{}' staged as '{}' but load failed, handing to registry: {}",
                    entry.id, object_name, err
                );
                self.registry
                    .register(&object_name, &outcome.uri, metadata, Some(entry.records))
                    .await
                    .map_err(|e| format!("load failed ({}) and registry write failed: {}", err, e))?;
                Ok(())
            }
        }
    }

    /// One kind's full path: validate, project, stage, load.
    async fn dispatch(&self, batch: DrainedBatch) -> DispatchResult {
        let kind = batch.kind;
        let mut result = DispatchResult::empty(kind);
        result.records_extracted = batch.len();

        if batch.is_empty() {
            return result;
        }

        let outcome = validate_batch(kind, &batch.records, Utc::now());
        result.records_invalid = outcome.stats.invalid;
        if outcome.stats.invalid > 0 {
            warn!(
                "{}: dropped {}/{} invalid records (rate {:.1}%)",
                kind,
                outcome.stats.invalid,
                outcome.stats.total,
                outcome.stats.rate()
            );
        }

        let mut records: Vec<ValidRecord> = outcome.valid;
        if records.is_empty() {
            // Nothing loadable: no staging, no load, queue already cleared.
            return result;
        }
        for record in &mut records {
            record.set_processing_id(batch.processing_id.as_str());
        }

        let payload = match to_ndjson(&records) {
            Ok(payload) => payload,
            Err(e) => {
                result.success = false;
                result.error = Some(e.to_string());
                return result;
            }
        };

        let metadata = HashMap::from([
            ("dataType".to_string(), kind.as_str().to_string()),
            ("recordCount".to_string(), records.len().to_string()),
            ("source".to_string(), SOURCE_LABEL.to_string()),
            (
                "processingId".to_string(),
                batch.processing_id.as_str().to_string(),
            ),
            ("originalSize".to_string(), payload.len().to_string()),
            (
                "extractedAt".to_string(),
                batch
                    .extracted_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        ]);

        let object_name = format!(
            "{}{}",
            self.prefix_for(kind),
            batch.processing_id.object_name()
        );

        let upload = match self
            .adapter
            .upload_ndjson(&payload, &object_name, &metadata)
            .await
        {
            Ok(upload) => upload,
            Err(err) => {
                warn!("{} upload failed, writing local backup: {}", kind, err);
                counter!("geosink.tick.upload_failures", 1);
                result.success = false;
                result.stage = Some(STAGE_UPLOAD_FAILED);
                result.error = Some(err.to_string());
                match self
                    .backups
                    .save_batch(kind, records, metadata.clone())
                    .await
                {
                    Ok(saved) => {
                        result.backup_created = true;
                        info!("batch {} backed up as '{}'", batch.processing_id, saved.backup_id);
                    }
                    Err(e) => {
                        // Local I/O failure on the write-aside path is the
                        // one place a batch can be lost; shout about it.
                        error!("backup write failed for batch {}: {}", batch.processing_id, e);
                        result.stage = Some(STAGE_BACKUP_WRITE_FAILED);
                    }
                }
                return result;
            }
        };

        match self
            .warehouse
            .load_from_uri(&upload.uri, kind, &metadata)
            .await
        {
            Ok(load) => {
                result.records_loaded = load.rows_written as usize;
                if self.cleanup_on_success {
                    if let Err(e) = self.adapter.delete(&object_name).await {
                        warn!("loaded '{}' but could not delete it: {}", object_name, e);
                    }
                }
            }
            Err(WarehouseError::Duplicate { job_id }) => {
                // Already committed by a prior attempt.
                info!("job '{}' already committed, skipping load", job_id);
                result.records_loaded = records.len();
            }
            Err(err) => {
                warn!("{} load failed, registering staged object: {}", kind, err);
                counter!("geosink.tick.load_failures", 1);
                result.success = false;
                result.stage = Some(STAGE_LOAD_FAILED);
                result.error = Some(err.to_string());
                match self
                    .registry
                    .register(&object_name, &upload.uri, metadata, Some(records))
                    .await
                {
                    Ok(_) => result.registry_entry_created = true,
                    Err(e) => {
                        error!(
                            "registry write failed for '{}': {} (object stays for orphan pickup)",
                            object_name, e
                        );
                    }
                }
            }
        }

        result
    }
}
