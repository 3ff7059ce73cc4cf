// geosink-recovery - Durable write-aside stores for failed hand-offs
//
// Two composed stores with similar file layouts but different lifecycles:
// the local backup store holds whole batches whose object-store upload
// failed, and the recovery registry tracks staged objects whose warehouse
// load failed (plus discovery of orphan objects left by crashed ticks).
// Entries are single JSON files written with an atomic temp-and-rename
// replace, so readers never observe torn state.

mod backup;
mod entrydir;
mod error;
mod registry;

pub use backup::{BackupEntry, LocalBackupStore, ProcessOutcome, SaveOutcome};
pub use entrydir::EntryStatus;
pub use error::RecoveryError;
pub use registry::{ProcessAllOutcome, RecoveryRegistry, RecoveryResult, RegistryEntry};
