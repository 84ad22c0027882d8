use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use relay_dispatch::DynDispatcher;
use relay_gate::Gate;
use relay_store::{QueueStore, StoreError};

use crate::config::WorkerConfig;
use crate::lifecycle::LifecycleState;
use crate::poller::Poller;
use crate::processor::Processor;
use crate::stats::{StatsSnapshot, WorkerStats, log_report, run_reporter};
use crate::sweeper::Sweeper;

/// Errors that end [`RelayService::run`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The store was unreachable at startup.
    #[error("store health check failed: {0}")]
    HealthCheck(#[source] StoreError),

    /// `run` was called on a service that is not in `created`.
    #[error("service already started (state: {0})")]
    AlreadyStarted(LifecycleState),

    /// A background task panicked.
    #[error("background task failed: {0}")]
    Task(String),
}

/// Owns the poller, sweeper and statistics reporter for one process and
/// drives them through the [`LifecycleState`] machine.
pub struct RelayService {
    store: Arc<dyn QueueStore>,
    gate: Arc<Gate>,
    dispatcher: Arc<dyn DynDispatcher>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
    state: watch::Sender<LifecycleState>,
}

impl RelayService {
    pub fn new(
        store: Arc<dyn QueueStore>,
        gate: Arc<Gate>,
        dispatcher: Arc<dyn DynDispatcher>,
        config: WorkerConfig,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);
        Self {
            store,
            gate,
            dispatcher,
            config,
            stats: Arc::new(WorkerStats::new()),
            state,
        }
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    fn transition(&self, next: LifecycleState) {
        let prev = self.state.send_replace(next);
        debug_assert!(prev.can_transition_to(next), "{prev} -> {next}");
        info!(from = %prev, to = %next, "lifecycle transition");
    }

    /// Start, run until `shutdown` fires, then drain and stop.
    ///
    /// The store health check is fatal. After `shutdown`, the poller finishes
    /// its current tick, the sweeper and reporter stop, a final report is
    /// logged, and the store is closed. Returns the final statistics.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<StatsSnapshot, ServiceError> {
        let current = self.state();
        if current != LifecycleState::Created {
            return Err(ServiceError::AlreadyStarted(current));
        }

        self.transition(LifecycleState::Initializing);
        if let Err(e) = self.store.health_check().await {
            error!(error = %e, "store health check failed, aborting startup");
            self.transition(LifecycleState::Stopped);
            return Err(ServiceError::HealthCheck(e));
        }
        if let Err(e) = self.dispatcher.health_check().await {
            warn!(error = %e, "downstream health check failed, starting anyway");
        }

        let processor = Arc::new(Processor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.gate),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.stats),
            self.config.max_processing_time(),
        ));
        let poller = Poller::new(
            Arc::clone(&self.store),
            processor,
            Arc::clone(&self.stats),
            self.config.clone(),
        );
        let sweeper = Sweeper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.stats),
            self.config.cleanup_interval(),
            self.config.stall_after(),
        );

        self.transition(LifecycleState::Running);

        let poll_task = tokio::spawn({
            let token = shutdown.clone();
            async move { poller.run(token).await }
        });
        let sweep_task = tokio::spawn({
            let token = shutdown.clone();
            async move { sweeper.run(token).await }
        });
        let report_task = tokio::spawn(run_reporter(
            Arc::clone(&self.stats),
            Arc::clone(&self.store),
            self.config.stats_interval(),
            shutdown.clone(),
        ));

        shutdown.cancelled().await;
        self.transition(LifecycleState::Draining);

        let mut failure = None;
        for (name, task) in [
            ("poller", poll_task),
            ("sweeper", sweep_task),
            ("reporter", report_task),
        ] {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "background task failed");
                failure.get_or_insert(ServiceError::Task(format!("{name}: {e}")));
            }
        }

        let depth = match self.store.status_counts().await {
            Ok(counts) => Some(counts),
            Err(e) => {
                warn!(error = %e, "failed to read final queue depth");
                None
            }
        };
        let snapshot = self.stats.snapshot();
        log_report("final", &snapshot, depth.as_ref());

        self.store.close().await;
        self.transition(LifecycleState::Stopped);

        match failure {
            Some(e) => Err(e),
            None => Ok(snapshot),
        }
    }
}
