use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use relay_store::{QueueStore, StoreError};

use crate::config::WorkerConfig;
use crate::processor::Processor;
use crate::stats::WorkerStats;

/// The claim loop.
///
/// Each tick claims up to `batch_size` rows, processes them with at most
/// `worker_count` in flight, and waits for every outcome before the next
/// claim. Shutdown interrupts the idle sleep but never a running tick.
pub struct Poller {
    store: Arc<dyn QueueStore>,
    processor: Arc<Processor>,
    stats: Arc<WorkerStats>,
    config: WorkerConfig,
}

impl Poller {
    pub fn new(
        store: Arc<dyn QueueStore>,
        processor: Arc<Processor>,
        stats: Arc<WorkerStats>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            processor,
            stats,
            config,
        }
    }

    /// Claim and fully process one batch. Returns the number of rows claimed.
    ///
    /// A failure to record one row's outcome is logged and does not abort the
    /// rest of the batch.
    ///
    /// # Errors
    ///
    /// Returns the [`StoreError`] if the claim itself fails; no row is
    /// affected in that case.
    pub async fn tick(&self) -> Result<usize, StoreError> {
        let batch = self
            .store
            .claim_batch(self.config.batch_size, Utc::now())
            .await?;
        let claimed = batch.len();
        if claimed == 0 {
            return Ok(0);
        }
        debug!(claimed, "claimed batch");

        futures::stream::iter(batch)
            .map(|request| {
                let processor = Arc::clone(&self.processor);
                async move {
                    let id = request.id;
                    if let Err(e) = processor.process(request).await {
                        error!(request_id = %id, error = %e, "failed to record outcome");
                    }
                }
            })
            .buffer_unordered(self.config.effective_concurrency())
            .collect::<Vec<()>>()
            .await;

        Ok(claimed)
    }

    /// Run ticks until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            batch_size = self.config.batch_size,
            worker_count = self.config.effective_concurrency(),
            "poller starting"
        );

        while !shutdown.is_cancelled() {
            let pause = match self.tick().await {
                Ok(0) => self.config.poll_interval(),
                // Work is waiting; claim again straight away.
                Ok(_) => continue,
                Err(e) => {
                    self.stats.increment_claim_errors();
                    error!(error = %e, retryable = e.is_retryable(), "claim failed, backing off");
                    self.config.claim_backoff()
                }
            };

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(pause) => {}
            }
        }

        info!("poller stopped");
    }
}
