use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_core::RequestStatus;
use relay_store::{QueueStore, StatusCounts};

/// Atomic counters tracking worker outcomes.
///
/// All counters use relaxed ordering. For a consistent point-in-time view,
/// call [`snapshot`](Self::snapshot).
#[derive(Debug)]
pub struct WorkerStats {
    /// Rows the processor wrote a terminal outcome for.
    pub processed: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
    /// Subset of `failed` refused by the gate.
    pub rejected: AtomicU64,
    /// Pending rows reaped by the sweeper.
    pub expired: AtomicU64,
    /// Processing rows reaped by the sweeper.
    pub stalled: AtomicU64,
    pub claim_errors: AtomicU64,
    total_latency_ms: AtomicU64,
    started: Instant,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerStats {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            stalled: AtomicU64::new(0),
            claim_errors: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Record one terminal outcome written by the processor.
    pub fn record_outcome(&self, status: RequestStatus, latency_ms: u64, rejected: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        match status {
            RequestStatus::Completed => self.completed.fetch_add(1, Ordering::Relaxed),
            RequestStatus::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
            RequestStatus::Timeout => self.timed_out.fetch_add(1, Ordering::Relaxed),
            RequestStatus::Pending | RequestStatus::Processing => return,
        };
        if rejected {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_expired(&self, n: u64) {
        self.expired.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_stalled(&self, n: u64) {
        self.stalled.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_claim_errors(&self) {
        self.claim_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot, deriving latency and throughput.
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> StatsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let total_latency_ms = self.total_latency_ms.load(Ordering::Relaxed);
        let uptime = self.started.elapsed();

        let avg_latency_ms = if processed == 0 {
            0.0
        } else {
            total_latency_ms as f64 / processed as f64
        };
        let secs = uptime.as_secs_f64();
        let throughput_per_sec = if secs > 0.0 {
            processed as f64 / secs
        } else {
            0.0
        };

        StatsSnapshot {
            processed,
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            stalled: self.stalled.load(Ordering::Relaxed),
            claim_errors: self.claim_errors.load(Ordering::Relaxed),
            avg_latency_ms,
            throughput_per_sec,
            uptime,
        }
    }
}

/// A plain data snapshot of [`WorkerStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub rejected: u64,
    pub expired: u64,
    pub stalled: u64,
    pub claim_errors: u64,
    pub avg_latency_ms: f64,
    /// Terminal outcomes written by the processor per second of uptime.
    pub throughput_per_sec: f64,
    pub uptime: Duration,
}

/// Emit one status line, with queue depth when it could be read.
pub fn log_report(label: &str, snapshot: &StatsSnapshot, depth: Option<&StatusCounts>) {
    let depth = depth.copied().unwrap_or_default();
    info!(
        report = label,
        processed = snapshot.processed,
        completed = snapshot.completed,
        failed = snapshot.failed,
        timed_out = snapshot.timed_out,
        rejected = snapshot.rejected,
        expired = snapshot.expired,
        stalled = snapshot.stalled,
        claim_errors = snapshot.claim_errors,
        avg_latency_ms = format_args!("{:.1}", snapshot.avg_latency_ms),
        throughput_per_sec = format_args!("{:.2}", snapshot.throughput_per_sec),
        pending = depth.pending,
        processing = depth.processing,
        uptime_secs = snapshot.uptime.as_secs(),
        "relay statistics"
    );
}

/// Log a report every `every` until `shutdown` fires.
pub async fn run_reporter(
    stats: Arc<WorkerStats>,
    store: Arc<dyn QueueStore>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let depth = match store.status_counts().await {
                    Ok(counts) => Some(counts),
                    Err(e) => {
                        warn!(error = %e, "failed to read queue depth");
                        None
                    }
                };
                log_report("periodic", &stats.snapshot(), depth.as_ref());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_starts_at_zero() {
        let stats = WorkerStats::new();
        let snap = stats.snapshot();
        assert_eq!(snap.processed, 0);
        assert_eq!(snap.claim_errors, 0);
        assert!((snap.avg_latency_ms - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn outcomes_and_average_latency() {
        let stats = WorkerStats::new();
        stats.record_outcome(RequestStatus::Completed, 100, false);
        stats.record_outcome(RequestStatus::Failed, 20, true);
        stats.record_outcome(RequestStatus::Timeout, 300, false);
        stats.increment_expired(2);
        stats.increment_stalled(1);
        stats.increment_claim_errors();

        let snap = stats.snapshot();
        assert_eq!(snap.processed, 3);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.timed_out, 1);
        assert_eq!(snap.expired, 2);
        assert_eq!(snap.stalled, 1);
        assert_eq!(snap.claim_errors, 1);
        assert!((snap.avg_latency_ms - 140.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn throughput_uses_uptime() {
        let stats = WorkerStats::new();
        for _ in 0..10 {
            stats.record_outcome(RequestStatus::Completed, 1, false);
        }
        tokio::time::advance(Duration::from_secs(5)).await;
        let snap = stats.snapshot();
        assert!((snap.throughput_per_sec - 2.0).abs() < 1e-6);
        assert_eq!(snap.uptime, Duration::from_secs(5));
    }
}
