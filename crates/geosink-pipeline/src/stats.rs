// Observable scheduler statistics

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct LastExecution {
    pub timestamp: DateTime<Utc>,
    pub records_processed: usize,
    pub processing_time_ms: u64,
    pub backups_processed: usize,
    pub backups_failed: usize,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub total_executions: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped_lock: u64,
    pub last_execution: Option<LastExecution>,
    pub next_execution_time: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

impl SchedulerStats {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            total_executions: 0,
            successful: 0,
            failed: 0,
            skipped_lock: 0,
            last_execution: None,
            next_execution_time: None,
            started_at,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            100.0
        } else {
            self.successful as f64 * 100.0 / self.total_executions as f64
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_executions: self.total_executions,
            successful: self.successful,
            failed: self.failed,
            skipped_lock: self.skipped_lock,
            last_execution: self.last_execution.clone(),
            next_execution_time: self.next_execution_time,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            success_rate: self.success_rate(),
        }
    }
}

/// Serializable snapshot served by the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_executions: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped_lock: u64,
    pub last_execution: Option<LastExecution>,
    pub next_execution_time: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_starts_full_and_tracks_failures() {
        let mut stats = SchedulerStats::new(Utc::now());
        assert_eq!(stats.success_rate(), 100.0);

        stats.total_executions = 4;
        stats.successful = 3;
        stats.failed = 1;
        assert_eq!(stats.success_rate(), 75.0);
    }

    #[test]
    fn snapshot_carries_last_execution() {
        let mut stats = SchedulerStats::new(Utc::now());
        stats.total_executions = 1;
        stats.successful = 1;
        stats.last_execution = Some(LastExecution {
            timestamp: Utc::now(),
            records_processed: 7,
            processing_time_ms: 120,
            backups_processed: 1,
            backups_failed: 0,
            success: true,
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.last_execution.unwrap().records_processed, 7);
        assert_eq!(snapshot.success_rate, 100.0);
    }
}
