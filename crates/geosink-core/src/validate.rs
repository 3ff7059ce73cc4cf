// Field-level validation and separation of the two record families.
//
// Validation is a pure function of the record bytes and the supplied clock
// value: the caller passes `now`, which is only used for the timestamp
// substitution policy and the `processed_at` stamp.

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::record::{GpsRecord, MobileRecord, RecordKind, ValidRecord};

/// Characters stripped from identity and name fields.
const SANITIZED: [char; 5] = ['<', '>', '"', '\'', '&'];

const MAX_NAME_LEN: usize = 100;
const MAX_EMAIL_LEN: usize = 254;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"));

/// A record that failed validation, with every field error collected.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidRecord {
    pub raw: String,
    pub errors: Vec<String>,
}

/// Per-batch validation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidationStats {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub timestamps_substituted: usize,
}

impl ValidationStats {
    /// Share of valid records, in percent. 100 for an empty batch.
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.valid as f64 * 100.0 / self.total as f64
        }
    }
}

/// Output of validating one drained batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub valid: Vec<ValidRecord>,
    pub invalid: Vec<InvalidRecord>,
    pub stats: ValidationStats,
}

/// Validate every raw queue entry of one kind and project the survivors
/// to the canonical warehouse row shape.
pub fn validate_batch(kind: RecordKind, raw: &[String], now: DateTime<Utc>) -> ValidationOutcome {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    let mut substituted = 0usize;

    for entry in raw {
        match validate_record(kind, entry, now) {
            Ok((record, ts_substituted)) => {
                if ts_substituted {
                    substituted += 1;
                }
                valid.push(record);
            }
            Err(errors) => invalid.push(InvalidRecord {
                raw: entry.clone(),
                errors,
            }),
        }
    }

    let stats = ValidationStats {
        total: raw.len(),
        valid: valid.len(),
        invalid: invalid.len(),
        timestamps_substituted: substituted,
    };

    ValidationOutcome {
        valid,
        invalid,
        stats,
    }
}

/// Validate a single raw record.
///
/// Returns the projected record and whether the timestamp had to be
/// substituted with the current wall clock, or the full list of field
/// errors. Unknown fields are dropped by projection.
pub fn validate_record(
    kind: RecordKind,
    raw: &str,
    now: DateTime<Utc>,
) -> Result<(ValidRecord, bool), Vec<String>> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return Err(vec![format!("invalid JSON: {}", e)]),
    };
    validate_value(kind, &value, now)
}

/// Validate an already-parsed record object.
pub fn validate_value(
    kind: RecordKind,
    value: &Value,
    now: DateTime<Utc>,
) -> Result<(ValidRecord, bool), Vec<String>> {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => return Err(vec!["record is not a JSON object".to_string()]),
    };

    let mut errors = Vec::new();

    let lat = match coerce_f64(obj.get("lat")) {
        Some(lat) if (-90.0..=90.0).contains(&lat) => Some(lat),
        Some(lat) => {
            errors.push(format!("lat {} out of range [-90, 90]", lat));
            None
        }
        None => {
            errors.push("lat missing or not numeric".to_string());
            None
        }
    };

    let lng = match coerce_f64(obj.get("lng")) {
        Some(lng) if (-180.0..=180.0).contains(&lng) => Some(lng),
        Some(lng) => {
            errors.push(format!("lng {} out of range [-180, 180]", lng));
            None
        }
        None => {
            errors.push("lng missing or not numeric".to_string());
            None
        }
    };

    let (timestamp, substituted) = normalize_timestamp(obj.get("timestamp"), now);
    let processed_at = Some(now.to_rfc3339_opts(SecondsFormat::Millis, true));

    let record = match kind {
        RecordKind::Gps => {
            let device_id = required_identity(obj, "deviceId", &mut errors);
            if !errors.is_empty() {
                return Err(errors);
            }
            ValidRecord::Gps(GpsRecord {
                device_id: device_id.unwrap_or_default(),
                lat: lat.unwrap_or_default(),
                lng: lng.unwrap_or_default(),
                timestamp,
                processed_at,
                processing_id: None,
            })
        }
        RecordKind::Mobile => {
            let user_id = required_identity(obj, "userId", &mut errors);
            let name = validate_name(obj.get("name"), &mut errors);
            let email = validate_email(obj.get("email"), &mut errors);
            if !errors.is_empty() {
                return Err(errors);
            }
            ValidRecord::Mobile(MobileRecord {
                user_id: user_id.unwrap_or_default(),
                name: name.unwrap_or_default(),
                email: email.unwrap_or_default(),
                lat: lat.unwrap_or_default(),
                lng: lng.unwrap_or_default(),
                timestamp,
                processed_at,
                processing_id: None,
            })
        }
    };

    Ok((record, substituted))
}

/// Numeric coercion: JSON numbers pass through, numeric strings parse.
fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Strip injection-prone characters from identity/name fields.
fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !SANITIZED.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

fn required_identity(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<String> {
    match obj.get(field).and_then(Value::as_str) {
        Some(raw) => {
            let cleaned = sanitize(raw);
            if cleaned.is_empty() {
                errors.push(format!("{} empty after sanitization", field));
                None
            } else {
                Some(cleaned)
            }
        }
        None => {
            errors.push(format!("{} missing or not a string", field));
            None
        }
    }
}

fn validate_name(value: Option<&Value>, errors: &mut Vec<String>) -> Option<String> {
    match value.and_then(Value::as_str) {
        Some(raw) => {
            let cleaned = sanitize(raw);
            if cleaned.is_empty() {
                errors.push("name empty after sanitization".to_string());
                None
            } else if cleaned.chars().count() > MAX_NAME_LEN {
                errors.push(format!("name longer than {} characters", MAX_NAME_LEN));
                None
            } else {
                Some(cleaned)
            }
        }
        None => {
            errors.push("name missing or not a string".to_string());
            None
        }
    }
}

fn validate_email(value: Option<&Value>, errors: &mut Vec<String>) -> Option<String> {
    match value.and_then(Value::as_str) {
        Some(raw) => {
            let lowered = raw.trim().to_lowercase();
            if lowered.len() > MAX_EMAIL_LEN {
                errors.push(format!("email longer than {} characters", MAX_EMAIL_LEN));
                None
            } else if !EMAIL_RE.is_match(&lowered) {
                errors.push("email does not match expected pattern".to_string());
                None
            } else {
                Some(lowered)
            }
        }
        None => {
            errors.push("email missing or not a string".to_string());
            None
        }
    }
}

/// Missing or unparseable timestamps are replaced with the current wall
/// clock to maximise load yield; the substitution is reported to the caller.
fn normalize_timestamp(value: Option<&Value>, now: DateTime<Utc>) -> (String, bool) {
    if let Some(raw) = value.and_then(Value::as_str) {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return (
                parsed
                    .with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
                false,
            );
        }
    }
    (now.to_rfc3339_opts(SecondsFormat::Millis, true), true)
}
