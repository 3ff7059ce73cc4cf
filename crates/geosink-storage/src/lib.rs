// geosink-storage - Object store adapter and warehouse loader
//
// The object store stages NDJSON batches as the durable hand-off to the
// warehouse; the warehouse loader submits load jobs from staged objects
// into the fixed per-kind tables. Both sit behind OpenDAL operators so the
// fs simulation backend behaves identically to the cloud backends, and the
// rest of the pipeline never branches on which backend is in effect.

mod error;
mod object;
pub mod warehouse;

pub use error::{StorageError, WarehouseError};
pub use object::{build_operator, ObjectStoreAdapter, StagedObject, UploadOutcome};
pub use warehouse::{
    derive_job_id, JobState, JobStatus, LoadJobOptions, LoadResult, NdjsonWarehouse,
    WarehouseLoader,
};
