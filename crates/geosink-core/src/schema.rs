// Fixed warehouse table schemas for the two record families.
//
// The loader runs with autodetect off, so these definitions are the single
// source of truth for what a loadable row looks like.

use serde_json::Value;

use crate::record::RecordKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Float,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    Required,
    Nullable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: &'static str,
    pub field_type: FieldType,
    pub mode: FieldMode,
}

const fn field(name: &'static str, field_type: FieldType, mode: FieldMode) -> FieldSchema {
    FieldSchema {
        name,
        field_type,
        mode,
    }
}

const GPS_SCHEMA: &[FieldSchema] = &[
    field("deviceId", FieldType::String, FieldMode::Required),
    field("lat", FieldType::Float, FieldMode::Required),
    field("lng", FieldType::Float, FieldMode::Required),
    field("timestamp", FieldType::Timestamp, FieldMode::Required),
    field("processed_at", FieldType::Timestamp, FieldMode::Nullable),
    field("processing_id", FieldType::String, FieldMode::Nullable),
];

const MOBILE_SCHEMA: &[FieldSchema] = &[
    field("userId", FieldType::String, FieldMode::Required),
    field("name", FieldType::String, FieldMode::Required),
    field("email", FieldType::String, FieldMode::Required),
    field("lat", FieldType::Float, FieldMode::Required),
    field("lng", FieldType::Float, FieldMode::Required),
    field("timestamp", FieldType::Timestamp, FieldMode::Required),
    field("processed_at", FieldType::Timestamp, FieldMode::Nullable),
    field("processing_id", FieldType::String, FieldMode::Nullable),
];

pub fn table_schema(kind: RecordKind) -> &'static [FieldSchema] {
    match kind {
        RecordKind::Gps => GPS_SCHEMA,
        RecordKind::Mobile => MOBILE_SCHEMA,
    }
}

impl FieldSchema {
    /// Check one JSON row value against this field definition.
    pub fn check(&self, row: &serde_json::Map<String, Value>) -> Result<(), String> {
        match row.get(self.name) {
            None | Some(Value::Null) => match self.mode {
                FieldMode::Required => Err(format!("required field {} is missing", self.name)),
                FieldMode::Nullable => Ok(()),
            },
            Some(value) => match self.field_type {
                FieldType::String | FieldType::Timestamp if value.is_string() => Ok(()),
                FieldType::Float if value.is_number() => Ok(()),
                _ => Err(format!(
                    "field {} has wrong type (expected {:?})",
                    self.name, self.field_type
                )),
            },
        }
    }
}

/// Validate a full row against a table schema. Unknown fields are an error:
/// the loader runs with ignoreUnknownValues off.
pub fn check_row(kind: RecordKind, row: &Value) -> Result<(), String> {
    let obj = row
        .as_object()
        .ok_or_else(|| "row is not a JSON object".to_string())?;

    let schema = table_schema(kind);
    for field in schema {
        field.check(obj)?;
    }
    for key in obj.keys() {
        if !schema.iter().any(|f| f.name == key) {
            return Err(format!("unknown field {} not in table schema", key));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gps_schema_has_warehouse_columns_in_order() {
        let names: Vec<&str> = table_schema(RecordKind::Gps).iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            ["deviceId", "lat", "lng", "timestamp", "processed_at", "processing_id"]
        );
    }

    #[test]
    fn mobile_schema_swaps_identity_and_adds_profile_fields() {
        let schema = table_schema(RecordKind::Mobile);
        assert!(schema.iter().any(|f| f.name == "userId"));
        assert!(schema.iter().any(|f| f.name == "email"));
        assert!(!schema.iter().any(|f| f.name == "deviceId"));
    }

    #[test]
    fn check_row_accepts_canonical_gps_row() {
        let row = json!({
            "deviceId": "d1",
            "lat": -12.04,
            "lng": -77.04,
            "timestamp": "2025-01-15T10:00:00.000Z",
            "processing_id": "gps_20250115100000_abc"
        });
        assert!(check_row(RecordKind::Gps, &row).is_ok());
    }

    #[test]
    fn check_row_rejects_missing_required_and_unknown_fields() {
        let row = json!({"lat": 1.0, "lng": 2.0, "timestamp": "t"});
        assert!(check_row(RecordKind::Gps, &row).unwrap_err().contains("deviceId"));

        let row = json!({
            "deviceId": "d1",
            "lat": 1.0,
            "lng": 2.0,
            "timestamp": "t",
            "speed": 40
        });
        assert!(check_row(RecordKind::Gps, &row).unwrap_err().contains("unknown field"));
    }
}
