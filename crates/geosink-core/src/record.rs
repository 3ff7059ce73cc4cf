// Record families and the batch-level tagged union.
//
// Field names on the wire match the warehouse column names exactly, so a
// serialized record is a loadable NDJSON row without further mapping.

use serde::{Deserialize, Serialize};

/// The two record families drained from the queue store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Gps,
    Mobile,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Gps => "gps",
            RecordKind::Mobile => "mobile",
        }
    }

    /// Default queue-store list key for this kind.
    pub fn default_queue_key(&self) -> &'static str {
        match self {
            RecordKind::Gps => "gps:history:global",
            RecordKind::Mobile => "mobile:history:global",
        }
    }

    /// Default object-store prefix for staged files of this kind.
    pub fn default_object_prefix(&self) -> &'static str {
        match self {
            RecordKind::Gps => "gps-data/",
            RecordKind::Mobile => "mobile-data/",
        }
    }

    /// Default warehouse table name for this kind.
    pub fn default_table(&self) -> &'static str {
        match self {
            RecordKind::Gps => "gps_records",
            RecordKind::Mobile => "mobile_records",
        }
    }

    /// Drain order matters: GPS first, mobile skipped if GPS fails.
    pub fn all() -> [RecordKind; 2] {
        [RecordKind::Gps, RecordKind::Mobile]
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gps" => Ok(RecordKind::Gps),
            "mobile" => Ok(RecordKind::Mobile),
            other => Err(format!("unknown record kind: {}", other)),
        }
    }
}

/// A validated, projected vehicle GPS record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsRecord {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub lat: f64,
    pub lng: f64,
    /// RFC3339 UTC timestamp.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_id: Option<String>,
}

/// A validated, projected mobile-user location record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileRecord {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub lat: f64,
    pub lng: f64,
    /// RFC3339 UTC timestamp.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_id: Option<String>,
}

/// Tagged union used at the batch level.
///
/// Serialization is untagged: an NDJSON line is the plain row object, and
/// the two families are distinguished by their identity field on re-parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValidRecord {
    Gps(GpsRecord),
    Mobile(MobileRecord),
}

impl ValidRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            ValidRecord::Gps(_) => RecordKind::Gps,
            ValidRecord::Mobile(_) => RecordKind::Mobile,
        }
    }

    /// Stamp the batch-invariant processing id onto the row.
    pub fn set_processing_id(&mut self, id: &str) {
        match self {
            ValidRecord::Gps(r) => r.processing_id = Some(id.to_string()),
            ValidRecord::Mobile(r) => r.processing_id = Some(id.to_string()),
        }
    }

    pub fn processing_id(&self) -> Option<&str> {
        match self {
            ValidRecord::Gps(r) => r.processing_id.as_deref(),
            ValidRecord::Mobile(r) => r.processing_id.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in RecordKind::all() {
            assert_eq!(kind.as_str().parse::<RecordKind>().unwrap(), kind);
        }
        assert!("web".parse::<RecordKind>().is_err());
    }

    #[test]
    fn gps_record_serializes_warehouse_field_names() {
        let record = GpsRecord {
            device_id: "d1".to_string(),
            lat: -12.04,
            lng: -77.04,
            timestamp: "2025-01-15T10:00:00Z".to_string(),
            processed_at: None,
            processing_id: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["deviceId"], "d1");
        assert!(json.get("processed_at").is_none());
    }

    #[test]
    fn untagged_union_reparses_by_identity_field() {
        let line = r#"{"userId":"u1","name":"Ana","email":"a@b.co","lat":1.0,"lng":2.0,"timestamp":"2025-01-15T10:00:00Z"}"#;
        let record: ValidRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.kind(), RecordKind::Mobile);

        let line = r#"{"deviceId":"d1","lat":1.0,"lng":2.0,"timestamp":"2025-01-15T10:00:00Z"}"#;
        let record: ValidRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.kind(), RecordKind::Gps);
    }
}
