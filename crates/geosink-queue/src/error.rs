// Error types for the queue store and distributed lock

use thiserror::Error;

/// Errors from queue store operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue store connection failed: {0}")]
    Connection(String),

    #[error("queue store command failed on '{key}': {reason}")]
    Command { key: String, reason: String },
}

impl QueueError {
    pub fn command(key: &str, reason: impl std::fmt::Display) -> Self {
        Self::Command {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Errors from distributed lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another instance held the lock for the whole wait window.
    #[error("timed out after {waited_secs}s waiting for lock '{key}'")]
    AcquireTimeout { key: String, waited_secs: u64 },

    #[error(transparent)]
    Store(#[from] QueueError),
}
