// Queue store backends
//
// The trait is the only seam the rest of the pipeline sees. The Redis
// backend is the production store; the in-memory backend serves tests and
// credential-less development with identical semantics.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::QueueError;

/// Read-all-then-clear in one server-side step. New pushes after the drain
/// land in a freshly-empty list and are picked up on the next tick.
const DRAIN_SCRIPT: &str = r#"
local entries = redis.call('LRANGE', KEYS[1], 0, -1)
redis.call('DEL', KEYS[1])
return entries
"#;

/// Compare-and-delete: never releases a lock that expired and was re-taken.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// List-based queue operations plus the token primitives backing the
/// distributed lock. No other component mutates these keys.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn len(&self, key: &str) -> Result<usize, QueueError>;

    async fn range_all(&self, key: &str) -> Result<Vec<String>, QueueError>;

    /// Delete the key entirely. Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, QueueError>;

    async fn rpush_many(&self, key: &str, values: &[String]) -> Result<(), QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;

    /// Atomically read the whole list and clear the key.
    async fn drain(&self, key: &str) -> Result<Vec<String>, QueueError>;

    /// SET-if-absent with TTL. Returns whether the token was written.
    async fn acquire_token(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, QueueError>;

    /// Delete the key only if it still holds `token`.
    async fn release_token(&self, key: &str, token: &str) -> Result<bool, QueueError>;
}

/// Redis-backed queue store over a shared connection manager.
pub struct RedisQueueStore {
    manager: ConnectionManager,
    drain_script: redis::Script,
    release_script: redis::Script,
}

impl RedisQueueStore {
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url).map_err(QueueError::from)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(QueueError::from)?;
        Ok(Self::new(manager))
    }

    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            drain_script: redis::Script::new(DRAIN_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        }
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn len(&self, key: &str) -> Result<usize, QueueError> {
        let mut con = self.manager.clone();
        let n: i64 = con.llen(key).await?;
        Ok(n.max(0) as usize)
    }

    async fn range_all(&self, key: &str) -> Result<Vec<String>, QueueError> {
        let mut con = self.manager.clone();
        let entries: Vec<String> = con.lrange(key, 0, -1).await?;
        Ok(entries)
    }

    async fn delete(&self, key: &str) -> Result<bool, QueueError> {
        let mut con = self.manager.clone();
        let removed: i64 = con.del(key).await?;
        Ok(removed > 0)
    }

    async fn rpush_many(&self, key: &str, values: &[String]) -> Result<(), QueueError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut con = self.manager.clone();
        let _: i64 = con.rpush(key, values).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut con = self.manager.clone();
        let reply: String = redis::cmd("PING").query_async(&mut con).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(QueueError::Connection(format!("unexpected PING reply: {}", reply)))
        }
    }

    async fn drain(&self, key: &str) -> Result<Vec<String>, QueueError> {
        let mut con = self.manager.clone();
        let entries: Vec<String> = self
            .drain_script
            .key(key)
            .invoke_async(&mut con)
            .await?;
        Ok(entries)
    }

    async fn acquire_token(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, QueueError> {
        let mut con = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut con)
            .await?;
        Ok(reply.is_some())
    }

    async fn release_token(&self, key: &str, token: &str) -> Result<bool, QueueError> {
        let mut con = self.manager.clone();
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(token)
            .invoke_async(&mut con)
            .await?;
        Ok(deleted > 0)
    }
}

#[derive(Default)]
struct MemoryState {
    lists: HashMap<String, Vec<String>>,
    tokens: HashMap<String, (String, Instant)>,
}

/// In-process queue store with the same contract as the Redis backend.
#[derive(Default)]
pub struct MemoryQueueStore {
    inner: Mutex<MemoryState>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn len(&self, key: &str) -> Result<usize, QueueError> {
        let state = self.inner.lock();
        Ok(state.lists.get(key).map_or(0, Vec::len))
    }

    async fn range_all(&self, key: &str) -> Result<Vec<String>, QueueError> {
        let state = self.inner.lock();
        Ok(state.lists.get(key).cloned().unwrap_or_default())
    }

    async fn delete(&self, key: &str) -> Result<bool, QueueError> {
        let mut state = self.inner.lock();
        Ok(state.lists.remove(key).is_some())
    }

    async fn rpush_many(&self, key: &str, values: &[String]) -> Result<(), QueueError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut state = self.inner.lock();
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .extend(values.iter().cloned());
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn drain(&self, key: &str) -> Result<Vec<String>, QueueError> {
        let mut state = self.inner.lock();
        Ok(state.lists.remove(key).unwrap_or_default())
    }

    async fn acquire_token(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, QueueError> {
        let mut state = self.inner.lock();
        let now = Instant::now();
        match state.tokens.get(key) {
            Some((_, expires)) if *expires > now => Ok(false),
            _ => {
                state
                    .tokens
                    .insert(key.to_string(), (token.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn release_token(&self, key: &str, token: &str) -> Result<bool, QueueError> {
        let mut state = self.inner.lock();
        let now = Instant::now();
        match state.tokens.get(key) {
            Some((held, expires)) if held == token && *expires > now => {
                state.tokens.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
