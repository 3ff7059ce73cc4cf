// Batch model: processing ids, drained batches, NDJSON encoding.
//
// The processing id is immutable for the life of a batch and every derived
// artifact: the staged object name, registry entries and the warehouse job
// id derivation all carry it.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{RecordKind, ValidRecord};

/// Errors from NDJSON encoding and parsing.
#[derive(Debug, Error)]
pub enum NdjsonError {
    #[error("failed to serialize record: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("line {line}: failed to parse record: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Batch identifier of the form `<kind>_<utcCompactTs>_<rand3>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessingId(String);

impl ProcessingId {
    pub fn generate(kind: RecordKind, now: DateTime<Utc>) -> Self {
        Self(format!(
            "{}_{}_{}",
            kind.as_str(),
            now.format("%Y%m%d%H%M%S"),
            random_suffix(3)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Staged object name derived from this id: `<id>.json`.
    pub fn object_name(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl std::fmt::Display for ProcessingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ProcessingId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lowercase alphanumeric randomizer used in ids and object names.
pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

/// The in-memory unit produced by one atomic drain of one queue key.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainedBatch {
    pub kind: RecordKind,
    /// Raw queue entries, pre-validation.
    pub records: Vec<String>,
    pub processing_id: ProcessingId,
    pub extracted_at: DateTime<Utc>,
}

impl DrainedBatch {
    pub fn new(kind: RecordKind, records: Vec<String>, extracted_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            records,
            processing_id: ProcessingId::generate(kind, extracted_at),
            extracted_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Encode validated records as newline-delimited JSON, one row per line.
pub fn to_ndjson(records: &[ValidRecord]) -> Result<String, NdjsonError> {
    let mut out = String::new();
    for record in records {
        let line = serde_json::to_string(record).map_err(NdjsonError::Serialize)?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Parse an NDJSON payload back into validated records. Blank lines are
/// tolerated (trailing newline from `to_ndjson`).
pub fn parse_ndjson(payload: &str) -> Result<Vec<ValidRecord>, NdjsonError> {
    let mut records = Vec::new();
    for (idx, line) in payload.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|source| NdjsonError::Parse {
            line: idx + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::GpsRecord;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
    }

    fn gps(device: &str) -> ValidRecord {
        ValidRecord::Gps(GpsRecord {
            device_id: device.to_string(),
            lat: -12.04,
            lng: -77.04,
            timestamp: "2025-01-15T10:00:00.000Z".to_string(),
            processed_at: Some("2025-01-15T10:00:01.000Z".to_string()),
            processing_id: Some("gps_20250115100000_abc".to_string()),
        })
    }

    #[test]
    fn processing_id_carries_kind_and_compact_timestamp() {
        let id = ProcessingId::generate(RecordKind::Gps, fixed_now());
        let parts: Vec<&str> = id.as_str().splitn(3, '_').collect();
        assert_eq!(parts[0], "gps");
        assert_eq!(parts[1], "20250115100000");
        assert_eq!(parts[2].len(), 3);
        assert_eq!(id.object_name(), format!("{}.json", id.as_str()));
    }

    #[test]
    fn ndjson_round_trip_preserves_warehouse_fields() {
        let records = vec![gps("d1"), gps("d2")];
        let payload = to_ndjson(&records).unwrap();
        assert_eq!(payload.lines().count(), 2);

        let parsed = parse_ndjson(&payload).unwrap();
        assert_eq!(parsed, records);
    }

    #[test]
    fn parse_rejects_malformed_lines_with_position() {
        let err = parse_ndjson("{\"deviceId\":\"d1\",\"lat\":1.0,\"lng\":2.0,\"timestamp\":\"t\"}\nnot json\n")
            .unwrap_err();
        match err {
            NdjsonError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn drained_batch_generates_matching_processing_id() {
        let batch = DrainedBatch::new(RecordKind::Mobile, vec!["{}".to_string()], fixed_now());
        assert!(batch.processing_id.as_str().starts_with("mobile_20250115100000_"));
        assert_eq!(batch.len(), 1);
        assert!(!batch.is_empty());
    }
}
