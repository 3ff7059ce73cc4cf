// Object store adapter
//
// Uploads NDJSON payloads with attached metadata, lists staged objects by
// prefix and deletes them. Metadata travels as a sidecar `<name>.meta`
// document so every backend (including the fs simulation backend) carries
// the same behavior; sidecars are invisible to listings.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use opendal::Operator;
use tracing::{debug, info};

use crate::error::StorageError;
use geosink_config::{StorageBackend, StorageConfig};

const META_SUFFIX: &str = ".meta";

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub uri: String,
    pub size: u64,
}

/// A staged object as seen by `list_by_prefix`.
#[derive(Debug, Clone)]
pub struct StagedObject {
    pub name: String,
    pub uri: String,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

/// Build the OpenDAL operator for the configured backend.
pub fn build_operator(config: &StorageConfig) -> Result<Operator, StorageError> {
    let operator = match config.backend {
        StorageBackend::Fs => {
            let fs = config
                .fs
                .as_ref()
                .ok_or_else(|| StorageError::Malformed("fs config required".to_string()))?;
            let builder = opendal::services::Fs::default().root(&fs.path);
            Operator::new(builder)?.finish()
        }
        StorageBackend::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| StorageError::Malformed("s3 config required".to_string()))?;
            let mut builder = opendal::services::S3::default()
                .bucket(&s3.bucket)
                .region(&s3.region);
            if let Some(endpoint) = &s3.endpoint {
                builder = builder.endpoint(endpoint);
            }
            Operator::new(builder)?.finish()
        }
        StorageBackend::Gcs => {
            let gcs = config
                .gcs
                .as_ref()
                .ok_or_else(|| StorageError::Malformed("gcs config required".to_string()))?;
            let builder = opendal::services::Gcs::default().bucket(&gcs.bucket);
            Operator::new(builder)?.finish()
        }
    };
    Ok(operator)
}

/// Backend-agnostic adapter over one OpenDAL operator.
#[derive(Clone)]
pub struct ObjectStoreAdapter {
    op: Operator,
    uri_base: String,
}

impl ObjectStoreAdapter {
    pub fn new(op: Operator) -> Self {
        let info = op.info();
        let uri_base = format!("{}://{}", info.scheme(), info.name().trim_matches('/'));
        Self { op, uri_base }
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Ok(Self::new(build_operator(config)?))
    }

    fn uri_for(&self, object_name: &str) -> String {
        format!("{}/{}", self.uri_base, object_name)
    }

    /// Map a URI produced by `uri_for` back to the object name. Foreign
    /// URIs yield None.
    pub fn object_name_from_uri(&self, uri: &str) -> Option<String> {
        uri.strip_prefix(&format!("{}/", self.uri_base))
            .map(str::to_string)
    }

    /// Upload an NDJSON payload with its metadata attached.
    ///
    /// An `Ok` return means the object and its metadata are durably stored
    /// and retrievable by `list_by_prefix`.
    pub async fn upload_ndjson(
        &self,
        payload: &str,
        object_name: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<UploadOutcome, StorageError> {
        if object_name.is_empty() || object_name.ends_with('/') {
            return Err(StorageError::Malformed(format!(
                "invalid object name '{}'",
                object_name
            )));
        }

        let size = payload.len() as u64;
        self.op.write(object_name, payload.to_string()).await?;

        let sidecar = serde_json::to_string(metadata)
            .map_err(|e| StorageError::Malformed(format!("metadata not serializable: {}", e)))?;
        self.op
            .write(&format!("{}{}", object_name, META_SUFFIX), sidecar)
            .await?;

        let uri = self.uri_for(object_name);
        info!("uploaded '{}' ({} bytes)", object_name, size);
        Ok(UploadOutcome { uri, size })
    }

    /// List staged objects under a prefix, metadata included. Sidecar
    /// documents are folded into their objects, never listed.
    pub async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<StagedObject>, StorageError> {
        let entries = self.op.list_with(prefix).recursive(true).await?;

        let mut objects = Vec::new();
        for entry in entries {
            let path = entry.path().to_string();
            if path.ends_with('/') || path.ends_with(META_SUFFIX) {
                continue;
            }

            let stat = self.op.stat(&path).await?;
            let metadata = self.read_metadata(&path).await?;
            objects.push(StagedObject {
                uri: self.uri_for(&path),
                size: stat.content_length(),
                created: stat.last_modified(),
                metadata,
                name: path,
            });
        }

        debug!("listed {} objects under '{}'", objects.len(), prefix);
        Ok(objects)
    }

    async fn read_metadata(&self, object_name: &str) -> Result<HashMap<String, String>, StorageError> {
        match self.op.read(&format!("{}{}", object_name, META_SUFFIX)).await {
            Ok(buffer) => serde_json::from_slice(&buffer.to_vec()).map_err(|e| {
                StorageError::Malformed(format!("metadata sidecar unreadable: {}", e))
            }),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, object_name: &str) -> Result<bool, StorageError> {
        Ok(self.op.exists(object_name).await?)
    }

    /// Read a staged object's NDJSON payload.
    pub async fn read(&self, object_name: &str) -> Result<String, StorageError> {
        let buffer = self.op.read(object_name).await?;
        String::from_utf8(buffer.to_vec())
            .map_err(|e| StorageError::Malformed(format!("object is not UTF-8: {}", e)))
    }

    /// Delete an object and its metadata sidecar.
    pub async fn delete(&self, object_name: &str) -> Result<(), StorageError> {
        self.op.delete(object_name).await?;
        self.op
            .delete(&format!("{}{}", object_name, META_SUFFIX))
            .await?;
        debug!("deleted '{}'", object_name);
        Ok(())
    }

    /// Liveness probe against the backend.
    pub async fn status(&self) -> Result<(), StorageError> {
        self.op.check().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_adapter() -> ObjectStoreAdapter {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        ObjectStoreAdapter::new(op)
    }

    fn sample_metadata() -> HashMap<String, String> {
        HashMap::from([
            ("dataType".to_string(), "gps".to_string()),
            ("recordCount".to_string(), "2".to_string()),
            ("processingId".to_string(), "gps_20250115100000_abc".to_string()),
        ])
    }

    #[tokio::test]
    async fn upload_then_list_returns_object_with_metadata() {
        let adapter = memory_adapter();
        let payload = "{\"a\":1}\n{\"a\":2}\n";
        let outcome = adapter
            .upload_ndjson(payload, "gps-data/gps_x.json", &sample_metadata())
            .await
            .unwrap();
        assert_eq!(outcome.size, payload.len() as u64);

        let objects = adapter.list_by_prefix("gps-data/").await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].name, "gps-data/gps_x.json");
        assert_eq!(objects[0].metadata["recordCount"], "2");
        assert_eq!(objects[0].uri, outcome.uri);
    }

    #[tokio::test]
    async fn sidecars_never_appear_in_listings() {
        let adapter = memory_adapter();
        adapter
            .upload_ndjson("{}\n", "gps-data/gps_x.json", &sample_metadata())
            .await
            .unwrap();
        let objects = adapter.list_by_prefix("gps-data/").await.unwrap();
        assert!(objects.iter().all(|o| !o.name.ends_with(".meta")));
    }

    #[tokio::test]
    async fn delete_removes_object_and_sidecar() {
        let adapter = memory_adapter();
        adapter
            .upload_ndjson("{}\n", "gps-data/gps_x.json", &sample_metadata())
            .await
            .unwrap();
        adapter.delete("gps-data/gps_x.json").await.unwrap();
        assert!(!adapter.exists("gps-data/gps_x.json").await.unwrap());
        assert!(adapter.list_by_prefix("gps-data/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn uri_round_trips_to_object_name() {
        let adapter = memory_adapter();
        let outcome = adapter
            .upload_ndjson("{}\n", "mobile-data/mobile_y.json", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(
            adapter.object_name_from_uri(&outcome.uri).unwrap(),
            "mobile-data/mobile_y.json"
        );
        assert!(adapter.object_name_from_uri("s3://elsewhere/x.json").is_none());
    }

    #[tokio::test]
    async fn rejects_malformed_object_names() {
        let adapter = memory_adapter();
        let err = adapter
            .upload_ndjson("{}\n", "", &HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "MALFORMED");
    }
}
