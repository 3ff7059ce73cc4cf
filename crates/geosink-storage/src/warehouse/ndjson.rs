// Disk/bucket-backed NDJSON warehouse
//
// Stores each committed load as its own immutable file under the table
// directory (append semantics at the table level) and keeps a durable job
// ledger keyed by job id. A re-submitted job id hits the ledger and is
// rejected as a duplicate, which is what makes registry retries idempotent.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use opendal::Operator;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{derive_job_id, JobState, JobStatus, LoadJobOptions, LoadResult, WarehouseLoader};
use crate::error::{StorageError, WarehouseError};
use crate::object::ObjectStoreAdapter;
use geosink_config::WarehouseConfig;
use geosink_core::schema::check_row;
use geosink_core::RecordKind;

/// Durable ledger entry, one per submitted job.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    job_id: String,
    table: String,
    state: JobState,
    errors: Vec<String>,
    rows_written: u64,
    bytes_read: u64,
    created_at: String,
}

pub struct NdjsonWarehouse {
    op: Operator,
    staging: ObjectStoreAdapter,
    dataset: String,
    gps_table: String,
    mobile_table: String,
    options: LoadJobOptions,
    job_timeout: Duration,
}

impl NdjsonWarehouse {
    pub fn new(
        op: Operator,
        staging: ObjectStoreAdapter,
        config: &WarehouseConfig,
    ) -> Self {
        Self {
            op,
            staging,
            dataset: config.dataset.clone(),
            gps_table: config.gps_table.clone(),
            mobile_table: config.mobile_table.clone(),
            options: LoadJobOptions {
                max_bad_records: config.max_bad_records,
                priority: config.priority.clone(),
                location: config.location.clone(),
                ..LoadJobOptions::default()
            },
            job_timeout: config.job_timeout(),
        }
    }

    /// Warehouse rooted at the configured local path (simulation mode).
    pub fn from_config(
        config: &WarehouseConfig,
        staging: ObjectStoreAdapter,
    ) -> Result<Self, WarehouseError> {
        let builder = opendal::services::Fs::default().root(&config.path);
        let op = Operator::new(builder)
            .map_err(|e| WarehouseError::Unavailable(e.to_string()))?
            .finish();
        Ok(Self::new(op, staging, config))
    }

    pub fn options(&self) -> &LoadJobOptions {
        &self.options
    }

    fn table_for(&self, kind: RecordKind) -> &str {
        match kind {
            RecordKind::Gps => &self.gps_table,
            RecordKind::Mobile => &self.mobile_table,
        }
    }

    fn ledger_path(&self, job_id: &str) -> String {
        format!("{}/_jobs/{}.json", self.dataset, job_id)
    }

    fn data_path(&self, table: &str, job_id: &str) -> String {
        format!("{}/{}/{}.ndjson", self.dataset, table, job_id)
    }

    /// Total committed rows of a table, summed over load files.
    pub async fn table_rows(&self, kind: RecordKind) -> Result<u64, WarehouseError> {
        let prefix = format!("{}/{}/", self.dataset, self.table_for(kind));
        let entries = self
            .op
            .list_with(&prefix)
            .recursive(true)
            .await
            .map_err(|e| WarehouseError::Unavailable(e.to_string()))?;

        let mut rows = 0u64;
        for entry in entries {
            if entry.path().ends_with('/') {
                continue;
            }
            let buffer = self
                .op
                .read(entry.path())
                .await
                .map_err(|e| WarehouseError::Unavailable(e.to_string()))?;
            let payload = String::from_utf8_lossy(&buffer.to_vec()).into_owned();
            rows += payload.lines().filter(|l| !l.trim().is_empty()).count() as u64;
        }
        Ok(rows)
    }

    async fn write_ledger(&self, record: &JobRecord) -> Result<(), WarehouseError> {
        let body = serde_json::to_string_pretty(record)
            .map_err(|e| WarehouseError::Unavailable(e.to_string()))?;
        self.op
            .write(&self.ledger_path(&record.job_id), body)
            .await
            .map(|_| ())
            .map_err(|e| WarehouseError::Unavailable(e.to_string()))
    }

    async fn run_job(
        &self,
        job_id: &str,
        uri: &str,
        kind: RecordKind,
    ) -> Result<LoadResult, WarehouseError> {
        // The ledger is the duplicate guard: one id, one commit.
        match self.op.exists(&self.ledger_path(job_id)).await {
            Ok(true) => {
                return Err(WarehouseError::Duplicate {
                    job_id: job_id.to_string(),
                })
            }
            Ok(false) => {}
            Err(e) => return Err(WarehouseError::Unavailable(e.to_string())),
        }

        let object_name = self
            .staging
            .object_name_from_uri(uri)
            .ok_or_else(|| WarehouseError::Source(StorageError::NotFound(uri.to_string())))?;
        let payload = self.staging.read(&object_name).await?;

        let table = self.table_for(kind).to_string();
        let mut good_lines = Vec::new();
        let mut errors = Vec::new();
        for (idx, line) in payload.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(line) {
                Ok(row) => match check_row(kind, &row) {
                    Ok(()) => good_lines.push(line),
                    Err(reason) => errors.push(format!("line {}: {}", idx + 1, reason)),
                },
                Err(e) => errors.push(format!("line {}: invalid JSON: {}", idx + 1, e)),
            }
        }

        if errors.len() > self.options.max_bad_records as usize {
            let record = JobRecord {
                job_id: job_id.to_string(),
                table,
                state: JobState::Error,
                errors: errors.clone(),
                rows_written: 0,
                bytes_read: payload.len() as u64,
                created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            };
            self.write_ledger(&record).await?;
            warn!("load job '{}' failed with {} bad rows", job_id, errors.len());
            return Err(WarehouseError::JobFailed {
                job_id: job_id.to_string(),
                errors,
            });
        }

        let mut body = good_lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        self.op
            .write(&self.data_path(&table, job_id), body)
            .await
            .map_err(|e| WarehouseError::Unavailable(e.to_string()))?;

        let result = LoadResult {
            job_id: job_id.to_string(),
            rows_written: good_lines.len() as u64,
            bytes_read: payload.len() as u64,
        };

        self.write_ledger(&JobRecord {
            job_id: job_id.to_string(),
            table: table.clone(),
            state: JobState::Done,
            errors: Vec::new(),
            rows_written: result.rows_written,
            bytes_read: result.bytes_read,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
        .await?;

        info!(
            "load job '{}' done: {} rows, {} bytes into {} ({} {})",
            job_id,
            result.rows_written,
            result.bytes_read,
            table,
            self.options.write_disposition,
            self.options.priority,
        );
        Ok(result)
    }
}

#[async_trait]
impl WarehouseLoader for NdjsonWarehouse {
    async fn load_from_uri(
        &self,
        uri: &str,
        kind: RecordKind,
        metadata: &HashMap<String, String>,
    ) -> Result<LoadResult, WarehouseError> {
        // processingId travels in the staged object's metadata; fall back to
        // the object file stem, which carries the same id.
        let processing_id = metadata
            .get("processingId")
            .cloned()
            .or_else(|| {
                uri.rsplit('/')
                    .next()
                    .map(|name| name.trim_end_matches(".json").to_string())
            })
            .ok_or_else(|| WarehouseError::Unavailable(format!("no processing id for {}", uri)))?;

        let job_id = derive_job_id(kind, &processing_id);

        match tokio::time::timeout(self.job_timeout, self.run_job(&job_id, uri, kind)).await {
            Ok(result) => result,
            Err(_) => Err(WarehouseError::Timeout { job_id }),
        }
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, WarehouseError> {
        match self.op.read(&self.ledger_path(job_id)).await {
            Ok(buffer) => {
                let record: JobRecord = serde_json::from_slice(&buffer.to_vec())
                    .map_err(|e| WarehouseError::Unavailable(e.to_string()))?;
                Ok(JobStatus {
                    state: record.state,
                    errors: record.errors,
                })
            }
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                Err(WarehouseError::UnknownJob(job_id.to_string()))
            }
            Err(e) => Err(WarehouseError::Unavailable(e.to_string())),
        }
    }

    /// Liveness probe against the warehouse backend.
    async fn status(&self) -> Result<(), WarehouseError> {
        self.op
            .check()
            .await
            .map_err(|e| WarehouseError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosink_config::WarehouseConfig;

    fn memory_fixture() -> (ObjectStoreAdapter, NdjsonWarehouse) {
        let staging_op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        let staging = ObjectStoreAdapter::new(staging_op);
        let warehouse_op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        let warehouse = NdjsonWarehouse::new(warehouse_op, staging.clone(), &WarehouseConfig::default());
        (staging, warehouse)
    }

    fn gps_line(device: &str) -> String {
        format!(
            "{{\"deviceId\":\"{}\",\"lat\":-12.04,\"lng\":-77.04,\"timestamp\":\"2025-01-15T10:00:00.000Z\",\"processing_id\":\"gps_20250115100000_abc\"}}",
            device
        )
    }

    async fn stage(staging: &ObjectStoreAdapter, name: &str, payload: &str) -> String {
        let metadata = HashMap::from([(
            "processingId".to_string(),
            "gps_20250115100000_abc".to_string(),
        )]);
        staging
            .upload_ndjson(payload, name, &metadata)
            .await
            .unwrap()
            .uri
    }

    fn load_metadata() -> HashMap<String, String> {
        HashMap::from([(
            "processingId".to_string(),
            "gps_20250115100000_abc".to_string(),
        )])
    }

    #[tokio::test]
    async fn clean_load_commits_rows_and_ledger() {
        let (staging, warehouse) = memory_fixture();
        let payload = format!("{}\n{}\n", gps_line("d1"), gps_line("d2"));
        let uri = stage(&staging, "gps-data/gps_20250115100000_abc.json", &payload).await;

        let result = warehouse
            .load_from_uri(&uri, RecordKind::Gps, &load_metadata())
            .await
            .unwrap();
        assert_eq!(result.rows_written, 2);
        assert_eq!(result.bytes_read, payload.len() as u64);
        assert_eq!(warehouse.table_rows(RecordKind::Gps).await.unwrap(), 2);

        let status = warehouse.job_status(&result.job_id).await.unwrap();
        assert_eq!(status.state, JobState::Done);
        assert!(status.errors.is_empty());
    }

    #[tokio::test]
    async fn resubmitting_the_same_batch_is_rejected_as_duplicate() {
        let (staging, warehouse) = memory_fixture();
        let payload = format!("{}\n", gps_line("d1"));
        let uri = stage(&staging, "gps-data/gps_20250115100000_abc.json", &payload).await;

        warehouse
            .load_from_uri(&uri, RecordKind::Gps, &load_metadata())
            .await
            .unwrap();
        let err = warehouse
            .load_from_uri(&uri, RecordKind::Gps, &load_metadata())
            .await
            .unwrap_err();
        assert!(err.is_duplicate());

        // Still exactly one committed copy.
        assert_eq!(warehouse.table_rows(RecordKind::Gps).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn schema_violations_fail_the_job_with_errors() {
        let (staging, warehouse) = memory_fixture();
        let payload = "{\"lat\":1.0,\"lng\":2.0,\"timestamp\":\"t\"}\n";
        let uri = stage(&staging, "gps-data/gps_20250115100000_abc.json", payload).await;

        let err = warehouse
            .load_from_uri(&uri, RecordKind::Gps, &load_metadata())
            .await
            .unwrap_err();
        match &err {
            WarehouseError::JobFailed { job_id, errors } => {
                assert_eq!(errors.len(), 1);
                let status = warehouse.job_status(job_id).await.unwrap();
                assert_eq!(status.state, JobState::Error);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(warehouse.table_rows(RecordKind::Gps).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_source_object_is_reported_as_source_error() {
        let (staging, warehouse) = memory_fixture();
        let payload = format!("{}\n", gps_line("d1"));
        let uri = stage(&staging, "gps-data/gps_20250115100000_abc.json", &payload).await;
        staging.delete("gps-data/gps_20250115100000_abc.json").await.unwrap();

        let err = warehouse
            .load_from_uri(&uri, RecordKind::Gps, &load_metadata())
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::Source(_)));
    }

    #[tokio::test]
    async fn unknown_job_status_is_distinct() {
        let (_staging, warehouse) = memory_fixture();
        assert!(matches!(
            warehouse.job_status("load_gps_missing_aaa").await.unwrap_err(),
            WarehouseError::UnknownJob(_)
        ));
    }
}
