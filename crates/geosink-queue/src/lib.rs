// geosink-queue - Queue store client, distributed lock, atomic drainer
//
// The queue store holds the two append-only list keys plus the lock key.
// Only the atomic drainer may clear the list keys; external producers
// append. The same store backs the TTL-bounded distributed lock that
// prevents overlapping pipeline ticks across processes.

mod drain;
mod error;
mod lock;
mod store;

pub use drain::{AtomicDrainer, DrainSummary};
pub use error::{LockError, QueueError};
pub use lock::DistributedLock;
pub use store::{MemoryQueueStore, QueueStore, RedisQueueStore};
