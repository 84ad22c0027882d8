use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, warn};

use relay_core::{Outcome, Request, RequestStatus};
use relay_dispatch::{DispatchError, DynDispatcher};
use relay_gate::Gate;
use relay_store::{QueueStore, StoreError};

use crate::stats::WorkerStats;

/// Runs one claimed row through the gate and the dispatcher and records
/// the result.
pub struct Processor {
    store: Arc<dyn QueueStore>,
    gate: Arc<Gate>,
    dispatcher: Arc<dyn DynDispatcher>,
    stats: Arc<WorkerStats>,
    max_processing_time: Duration,
}

impl Processor {
    pub fn new(
        store: Arc<dyn QueueStore>,
        gate: Arc<Gate>,
        dispatcher: Arc<dyn DynDispatcher>,
        stats: Arc<WorkerStats>,
        max_processing_time: Duration,
    ) -> Self {
        Self {
            store,
            gate,
            dispatcher,
            stats,
            max_processing_time,
        }
    }

    /// Process a row already claimed as `processing` and write its terminal
    /// outcome. Returns the status the row ended in.
    ///
    /// # Errors
    ///
    /// Returns the [`StoreError`] if the outcome could not be written, for
    /// example because the sweeper already reaped the row as stalled.
    pub async fn process(&self, request: Request) -> Result<RequestStatus, StoreError> {
        let id = request.id;
        let started = Instant::now();
        let (outcome, rejected) = self.evaluate(request, started).await;
        let status = outcome.status;
        let latency_ms = u64::try_from(outcome.processing_time_ms).unwrap_or(0);

        self.store.complete(id, outcome, Utc::now()).await?;
        self.stats.record_outcome(status, latency_ms, rejected);
        debug!(request_id = %id, status = %status, latency_ms, "request finished");
        Ok(status)
    }

    /// Decide the outcome for a row without touching the store. The flag is
    /// `true` when the gate refused the row.
    async fn evaluate(&self, request: Request, started: Instant) -> (Outcome, bool) {
        let id = request.id;
        let admitted = match self.gate.admit(request) {
            Ok(admitted) => admitted,
            Err(rejection) => {
                let message = rejection.to_string();
                warn!(request_id = %id, stage = rejection.stage(), error = %message, "request rejected");
                let outcome = Outcome::failed(
                    rejection.stage(),
                    message.clone(),
                    json!({ "error": message, "stage": rejection.stage() }),
                    elapsed_ms(started),
                );
                return (outcome, true);
            }
        };

        let dispatched =
            tokio::time::timeout(self.max_processing_time, self.dispatcher.dispatch(&admitted))
                .await;
        let ms = elapsed_ms(started);

        let outcome = match dispatched {
            Ok(Ok(body)) => Outcome::completed(body, ms),
            Ok(Err(e)) if e.is_timeout() => {
                warn!(request_id = %id, error = %e, "downstream call timed out");
                Outcome::timed_out(e.to_string(), ms)
            }
            Ok(Err(e)) => {
                warn!(request_id = %id, error = %e, retryable = e.is_retryable(), "dispatch failed");
                Outcome::failed("dispatch", e.to_string(), error_body(&e), ms)
            }
            Err(_) => {
                warn!(request_id = %id, budget_ms = ms, "processing budget exceeded");
                Outcome::timed_out(
                    format!(
                        "processing exceeded {}ms",
                        self.max_processing_time.as_millis()
                    ),
                    ms,
                )
            }
        };
        (outcome, false)
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

/// Response payload for a failed dispatch: the downstream body when it is
/// JSON, otherwise the error text.
fn error_body(error: &DispatchError) -> serde_json::Value {
    match error {
        DispatchError::Status { status, body } => {
            let parsed = serde_json::from_str::<serde_json::Value>(body)
                .unwrap_or_else(|_| json!(body));
            json!({ "status_code": status, "body": parsed })
        }
        other => json!({ "error": other.to_string() }),
    }
}
