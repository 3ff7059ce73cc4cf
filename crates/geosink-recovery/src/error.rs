// Error type for the durable stores

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("entry {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("entry {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] geosink_storage::StorageError),
}

impl RecoveryError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
