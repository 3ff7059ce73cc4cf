// Distributed lock over the queue store
//
// SET-if-absent with TTL plus compare-and-delete release. The token is
// unique per acquisition so a holder can never release a lock that expired
// and was re-taken by another instance.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{LockError, QueueError};
use crate::store::QueueStore;
use geosink_core::batch::random_suffix;

const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct DistributedLock {
    store: Arc<dyn QueueStore>,
    key: String,
    ttl: Duration,
    token: Mutex<Option<String>>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn QueueStore>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
            token: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Single acquisition attempt. Returns whether this instance won.
    pub async fn acquire(&self) -> Result<bool, QueueError> {
        let token = format!("{}-{}", Utc::now().timestamp_millis(), random_suffix(8));
        let won = self
            .store
            .acquire_token(&self.key, &token, self.ttl)
            .await?;
        if won {
            debug!("acquired lock '{}' (ttl {:?})", self.key, self.ttl);
            *self.token.lock() = Some(token);
        }
        Ok(won)
    }

    /// Release the lock if this instance still holds it.
    pub async fn release(&self) -> Result<bool, QueueError> {
        let token = match self.token.lock().take() {
            Some(token) => token,
            None => return Ok(false),
        };
        let released = self.store.release_token(&self.key, &token).await?;
        if !released {
            warn!(
                "lock '{}' was not released: token expired and re-taken elsewhere",
                self.key
            );
        }
        Ok(released)
    }

    /// Run `f` under the lock, polling for acquisition up to `max_wait`.
    pub async fn with_lock<F, Fut, T>(&self, max_wait: Duration, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let started = tokio::time::Instant::now();
        loop {
            if self.acquire().await? {
                break;
            }
            if started.elapsed() >= max_wait {
                return Err(LockError::AcquireTimeout {
                    key: self.key.clone(),
                    waited_secs: max_wait.as_secs(),
                });
            }
            tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
        }

        let result = f().await;

        if let Err(e) = self.release().await {
            warn!("failed to release lock '{}': {}", self.key, e);
        }

        Ok(result)
    }
}
