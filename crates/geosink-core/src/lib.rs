// geosink-core - Pure domain logic for the location ingestion pipeline
//
// This crate contains the I/O-free processing logic: the two record
// families, field-level validation and separation, projection to the
// warehouse row shapes, the batch model with its processing ids, and
// NDJSON encoding for staged objects. No async, no runtime dependencies.

pub mod batch;
pub mod record;
pub mod schema;
pub mod validate;

pub use batch::{parse_ndjson, to_ndjson, DrainedBatch, NdjsonError, ProcessingId};
pub use record::{GpsRecord, MobileRecord, RecordKind, ValidRecord};
pub use schema::{table_schema, FieldMode, FieldSchema, FieldType};
pub use validate::{validate_batch, validate_record, InvalidRecord, ValidationOutcome, ValidationStats};
