// Scheduler
//
// Fixed-interval timer around the orchestrator. Each tick must win the
// distributed lock or it is skipped (another instance is draining); an
// in-process semaphore capped at 1 guards against overlap even if the lock
// store misbehaves. Cleanup timers run independently of ticks. Shutdown is
// graceful: the in-flight tick completes, cleanup timers stop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::orchestrator::{Pipeline, TickResult};
use crate::stats::{LastExecution, SchedulerStats, StatsSnapshot};
use geosink_queue::DistributedLock;
use geosink_recovery::{LocalBackupStore, RecoveryRegistry};

/// Stale atomic-write temp files older than this are swept by the tmp
/// cleanup timer.
const TMP_FILE_MAX_AGE: Duration = Duration::from_secs(3600);

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    lock: Arc<DistributedLock>,
    backups: Arc<LocalBackupStore>,
    registry: Arc<RecoveryRegistry>,
    tick_interval: Duration,
    lock_max_wait: Duration,
    cleanup_interval: Duration,
    tmp_cleanup_interval: Duration,
    tick_guard: Arc<Semaphore>,
    stats: Mutex<SchedulerStats>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline: Arc<Pipeline>,
        lock: Arc<DistributedLock>,
        backups: Arc<LocalBackupStore>,
        registry: Arc<RecoveryRegistry>,
        tick_interval: Duration,
        lock_max_wait: Duration,
        cleanup_interval: Duration,
        tmp_cleanup_interval: Duration,
    ) -> Self {
        Self {
            pipeline,
            lock,
            backups,
            registry,
            tick_interval,
            lock_max_wait,
            cleanup_interval,
            tmp_cleanup_interval,
            tick_guard: Arc::new(Semaphore::new(1)),
            stats: Mutex::new(SchedulerStats::new(Utc::now())),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.lock().snapshot()
    }

    /// Run the scheduler until the shutdown signal flips. The in-flight
    /// tick always completes before this returns.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "scheduler started: tick every {:?}, cleanup every {:?}",
            self.tick_interval, self.cleanup_interval
        );

        let cleanup_task = tokio::spawn(
            self.clone()
                .run_cleanup_timers(shutdown.clone()),
        );

        let mut timer = tokio::time::interval(self.tick_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The interval fires immediately once; consume that so the first
        // tick happens one full interval after startup.
        timer.tick().await;
        self.stats.lock().next_execution_time = Some(
            Utc::now() + chrono::Duration::from_std(self.tick_interval)
                            .unwrap_or_else(|_| chrono::Duration::zero()),
        );

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.run_scheduled_tick().await;
                    self.stats.lock().next_execution_time = Some(
                        Utc::now()
                            + chrono::Duration::from_std(self.tick_interval)
                            .unwrap_or_else(|_| chrono::Duration::zero()),
                    );
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        cleanup_task.abort();
        let _ = cleanup_task.await;
        info!("scheduler stopped");
    }

    /// One scheduled tick: in-process guard, then lock-or-skip, then run.
    pub async fn run_scheduled_tick(&self) -> Option<TickResult> {
        let permit = match self.tick_guard.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("previous tick still running, skipping this one");
                return None;
            }
        };

        let acquired = match self.lock.acquire().await {
            Ok(acquired) => acquired,
            Err(e) => {
                error!("lock acquisition failed: {}", e);
                self.stats.lock().skipped_lock += 1;
                drop(permit);
                return None;
            }
        };
        if !acquired {
            // Another instance is draining; not an operator-visible error.
            info!("another instance holds '{}', skipping tick", self.lock.key());
            self.stats.lock().skipped_lock += 1;
            drop(permit);
            return None;
        }

        let result = self.pipeline.run_tick().await;

        if let Err(e) = self.lock.release().await {
            warn!("lock release failed: {}", e);
        }
        drop(permit);

        self.record(&result);
        Some(result)
    }

    /// Run exactly one tick, waiting for the lock up to the configured
    /// bound. Used by the one-shot CLI mode.
    pub async fn run_once(&self) -> Result<TickResult> {
        let result = self
            .lock
            .with_lock(self.lock_max_wait, || self.pipeline.run_tick())
            .await
            .context("could not acquire the pipeline lock")?;
        self.record(&result);
        Ok(result)
    }

    fn record(&self, result: &TickResult) {
        let mut stats = self.stats.lock();
        stats.total_executions += 1;
        if result.success {
            stats.successful += 1;
        } else {
            stats.failed += 1;
        }
        stats.last_execution = Some(LastExecution {
            timestamp: Utc::now(),
            records_processed: result.records_processed,
            processing_time_ms: result.total_ms,
            backups_processed: result.backups_processed,
            backups_failed: result.backups_failed,
            success: result.success,
        });
    }

    /// Independent timers: terminal-entry retention sweeps plus a stale
    /// temp-file sweep. They compete with ticks for nothing but the entry
    /// directories, and only ever remove terminal entries.
    async fn run_cleanup_timers(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut store_timer = tokio::time::interval(self.cleanup_interval);
        let mut tmp_timer = tokio::time::interval(self.tmp_cleanup_interval);
        store_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tmp_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        store_timer.tick().await;
        tmp_timer.tick().await;

        loop {
            tokio::select! {
                _ = store_timer.tick() => {
                    let retention = self.backups.retention();
                    if let Err(e) = self.backups.cleanup_completed(retention).await {
                        warn!("backup cleanup failed: {}", e);
                    }
                    if let Err(e) = self.registry.cleanup(retention).await {
                        warn!("registry cleanup failed: {}", e);
                    }
                }
                _ = tmp_timer.tick() => {
                    for dir in [self.backups.dir(), self.registry.dir()] {
                        if let Err(e) = sweep_tmp_files(dir, TMP_FILE_MAX_AGE).await {
                            warn!("tmp sweep of {} failed: {}", dir.display(), e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

/// Remove `.tmp` leftovers from interrupted atomic writes.
async fn sweep_tmp_files(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    let mut reader = tokio::fs::read_dir(dir).await?;
    while let Some(dirent) = reader.next_entry().await? {
        let path = dirent.path();
        if path.extension().and_then(|e| e.to_str()) != Some("tmp") {
            continue;
        }
        let stale = match dirent.metadata().await?.modified() {
            Ok(modified) => modified.elapsed().map_or(false, |age| age > max_age),
            Err(_) => true,
        };
        if stale {
            tokio::fs::remove_file(&path).await?;
            removed += 1;
        }
    }
    if removed > 0 {
        info!("swept {} stale tmp files from {}", removed, dir.display());
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_removes_only_stale_tmp_files() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("old.json.tmp");
        let fresh = dir.path().join("fresh.json.tmp");
        let entry = dir.path().join("entry.json");
        tokio::fs::write(&stale, b"{}").await.unwrap();
        tokio::fs::write(&fresh, b"{}").await.unwrap();
        tokio::fs::write(&entry, b"{}").await.unwrap();

        // Everything is fresh: nothing is swept.
        let removed = sweep_tmp_files(dir.path(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        // With a zero threshold both tmp files are stale; the entry stays.
        let removed = sweep_tmp_files(dir.path(), Duration::ZERO).await.unwrap();
        assert_eq!(removed, 2);
        assert!(entry.exists());
    }
}
