// Error taxonomies for the object store adapter and the warehouse loader
//
// Failures are returned, not raised: callers branch on the kind to decide
// between write-aside (retry-worthy) and terminal escalation.

use thiserror::Error;

/// Object store failure taxonomy.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Transient backend trouble; the batch is worth retrying later.
    #[error("object store unavailable: {0}")]
    Unavailable(String),

    #[error("object store permission denied: {0}")]
    Permission(String),

    #[error("object not found: {0}")]
    NotFound(String),

    /// Metadata or object name rejected by the backend.
    #[error("malformed object request: {0}")]
    Malformed(String),
}

impl StorageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Unavailable(_) => "UNAVAILABLE",
            StorageError::Permission(_) => "PERMISSION",
            StorageError::NotFound(_) => "NOT_FOUND",
            StorageError::Malformed(_) => "MALFORMED",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

impl From<opendal::Error> for StorageError {
    fn from(err: opendal::Error) -> Self {
        match err.kind() {
            opendal::ErrorKind::NotFound => StorageError::NotFound(err.to_string()),
            opendal::ErrorKind::PermissionDenied => StorageError::Permission(err.to_string()),
            opendal::ErrorKind::ConfigInvalid | opendal::ErrorKind::Unsupported => {
                StorageError::Malformed(err.to_string())
            }
            _ => StorageError::Unavailable(err.to_string()),
        }
    }
}

/// Warehouse loader failure taxonomy.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// A job with this id already ran; the submission was rejected.
    #[error("duplicate job id '{job_id}'")]
    Duplicate { job_id: String },

    /// The job reached a terminal state with errors.
    #[error("load job '{job_id}' failed: {}", errors.join("; "))]
    JobFailed { job_id: String, errors: Vec<String> },

    #[error("load job '{job_id}' exceeded its timeout")]
    Timeout { job_id: String },

    #[error("unknown job id '{0}'")]
    UnknownJob(String),

    /// The staged source object could not be read.
    #[error("staged object unreadable: {0}")]
    Source(#[from] StorageError),

    #[error("warehouse unavailable: {0}")]
    Unavailable(String),
}

impl WarehouseError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, WarehouseError::Duplicate { .. })
    }
}
