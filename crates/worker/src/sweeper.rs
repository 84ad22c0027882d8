use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use relay_core::RequestId;
use relay_store::{QueueStore, StoreError};

use crate::stats::WorkerStats;

/// Rows moved to `timeout` by one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pending rows whose deadline passed before anyone claimed them.
    pub expired: Vec<RequestId>,
    /// Processing rows held past the stall threshold.
    pub stalled: Vec<RequestId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.stalled.is_empty()
    }
}

/// Periodically reaps expired pending rows and abandoned processing rows.
/// Runs on its own cadence, independent of the poller.
pub struct Sweeper {
    store: Arc<dyn QueueStore>,
    stats: Arc<WorkerStats>,
    interval: Duration,
    stall_after: chrono::Duration,
}

impl Sweeper {
    /// `stall_after` is how long a row may stay `processing` before it is
    /// reaped.
    pub fn new(
        store: Arc<dyn QueueStore>,
        stats: Arc<WorkerStats>,
        interval: Duration,
        stall_after: Duration,
    ) -> Self {
        Self {
            store,
            stats,
            interval: interval.max(Duration::from_millis(1)),
            stall_after: chrono::Duration::from_std(stall_after).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Run one sweep.
    ///
    /// # Errors
    ///
    /// Returns the [`StoreError`] from the first store call that fails.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let now = Utc::now();
        let expired = self.store.expire_pending(now).await?;
        let claimed_before = now
            .checked_sub_signed(self.stall_after)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let stalled = self.store.reap_stalled(claimed_before, now).await?;

        self.stats.increment_expired(expired.len() as u64);
        self.stats.increment_stalled(stalled.len() as u64);

        let report = SweepReport { expired, stalled };
        if !report.is_empty() {
            info!(
                expired = report.expired.len(),
                stalled = report.stalled.len(),
                "sweeper reaped rows"
            );
        }
        Ok(report)
    }

    /// Sweep every interval until `shutdown` fires. The first sweep runs
    /// immediately.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval_ms = self.interval.as_millis(), "sweeper starting");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "sweep failed");
                    }
                }
            }
        }

        info!("sweeper stopped");
    }
}
