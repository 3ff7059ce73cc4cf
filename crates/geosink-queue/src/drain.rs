// Atomic drainer
//
// Snapshots a whole queue key and clears it in one server-side step, so a
// record is either in the queue or in exactly one in-flight batch, never
// both. Coordination across the two kinds is sequential: GPS first, and a
// GPS failure skips the mobile drain to avoid half-drained state.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::QueueError;
use crate::store::QueueStore;
use geosink_core::{DrainedBatch, RecordKind};

/// Both per-kind batches plus extraction timing.
#[derive(Debug)]
pub struct DrainSummary {
    pub gps: DrainedBatch,
    pub mobile: DrainedBatch,
    pub extraction_ms: u64,
}

impl DrainSummary {
    pub fn total_records(&self) -> usize {
        self.gps.len() + self.mobile.len()
    }
}

pub struct AtomicDrainer {
    store: Arc<dyn QueueStore>,
    gps_key: String,
    mobile_key: String,
}

impl AtomicDrainer {
    pub fn new(
        store: Arc<dyn QueueStore>,
        gps_key: impl Into<String>,
        mobile_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gps_key: gps_key.into(),
            mobile_key: mobile_key.into(),
        }
    }

    fn key_for(&self, kind: RecordKind) -> &str {
        match kind {
            RecordKind::Gps => &self.gps_key,
            RecordKind::Mobile => &self.mobile_key,
        }
    }

    /// Snapshot-and-clear one queue key.
    pub async fn extract_and_clear(&self, kind: RecordKind) -> Result<DrainedBatch, QueueError> {
        let key = self.key_for(kind);

        let pending = self.store.len(key).await?;
        if pending == 0 {
            debug!("queue '{}' empty, skipping {} drain", key, kind);
            return Ok(DrainedBatch::new(kind, Vec::new(), Utc::now()));
        }

        let records = self.store.drain(key).await?;
        let batch = DrainedBatch::new(kind, records, Utc::now());

        // Anything visible now arrived after the snapshot and waits for the
        // next tick.
        let after = self.store.len(key).await?;
        if after > 0 {
            warn!(
                "queue '{}' received {} records during drain; they stay for the next tick",
                key, after
            );
        }

        info!(
            "drained {} {} records as batch {}",
            batch.len(),
            kind,
            batch.processing_id
        );
        Ok(batch)
    }

    /// Drain both kinds. GPS runs first; a GPS failure aborts before the
    /// mobile drain so no half-drained state is left behind.
    pub async fn extract_all(&self) -> Result<DrainSummary, QueueError> {
        let started = Instant::now();

        let gps = self.extract_and_clear(RecordKind::Gps).await?;
        let mobile = self.extract_and_clear(RecordKind::Mobile).await?;

        Ok(DrainSummary {
            gps,
            mobile,
            extraction_ms: started.elapsed().as_millis() as u64,
        })
    }
}
