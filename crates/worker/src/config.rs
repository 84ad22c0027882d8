use std::time::Duration;

use serde::{Deserialize, Serialize};

/// `[worker]` configuration. Every duration is in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sleep between ticks when a claim comes back empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum rows claimed per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum rows processed concurrently within one tick.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Budget for gate plus dispatch of one row before it is classified as
    /// `timeout`.
    #[serde(default = "default_max_processing_time_ms")]
    pub max_processing_time_ms: u64,
    /// Sleep after a failed claim before the next tick.
    #[serde(default = "default_claim_backoff_ms")]
    pub claim_backoff_ms: u64,
    /// Sweeper cadence.
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    /// Periodic statistics report cadence.
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
    /// Extra time past `max_processing_time_ms` before a `processing` row is
    /// considered abandoned.
    #[serde(default = "default_stall_grace_ms")]
    pub stall_grace_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            worker_count: default_worker_count(),
            max_processing_time_ms: default_max_processing_time_ms(),
            claim_backoff_ms: default_claim_backoff_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            stats_interval_ms: default_stats_interval_ms(),
            stall_grace_ms: default_stall_grace_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_processing_time(&self) -> Duration {
        Duration::from_millis(self.max_processing_time_ms)
    }

    pub fn claim_backoff(&self) -> Duration {
        Duration::from_millis(self.claim_backoff_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    /// How long a row may sit in `processing` before the sweeper reaps it.
    pub fn stall_after(&self) -> Duration {
        Duration::from_millis(
            self.max_processing_time_ms
                .saturating_add(self.stall_grace_ms),
        )
    }

    /// Concurrency actually used within a tick: never more than a batch.
    pub fn effective_concurrency(&self) -> usize {
        self.worker_count.min(self.batch_size).max(1)
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_batch_size() -> usize {
    10
}

fn default_worker_count() -> usize {
    4
}

fn default_max_processing_time_ms() -> u64 {
    30_000
}

fn default_claim_backoff_ms() -> u64 {
    2_000
}

fn default_cleanup_interval_ms() -> u64 {
    10_000
}

fn default_stats_interval_ms() -> u64 {
    60_000
}

fn default_stall_grace_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.poll_interval(), Duration::from_millis(500));
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.worker_count, 4);
        assert_eq!(cfg.stall_after(), Duration::from_secs(60));
    }

    #[test]
    fn concurrency_is_bounded_by_batch() {
        let cfg = WorkerConfig {
            batch_size: 2,
            worker_count: 8,
            ..WorkerConfig::default()
        };
        assert_eq!(cfg.effective_concurrency(), 2);

        let cfg = WorkerConfig {
            worker_count: 0,
            ..WorkerConfig::default()
        };
        assert_eq!(cfg.effective_concurrency(), 1);
    }
}
