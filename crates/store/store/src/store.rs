use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relay_core::{AuditLogEntry, NewRequest, Outcome, Request, RequestId, RequestStatus, Response};

use crate::error::StoreError;

/// Number of rows in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub timeout: u64,
}

impl StatusCounts {
    /// Add `n` rows to the bucket for `status`.
    pub fn add(&mut self, status: RequestStatus, n: u64) {
        match status {
            RequestStatus::Pending => self.pending += n,
            RequestStatus::Processing => self.processing += n,
            RequestStatus::Completed => self.completed += n,
            RequestStatus::Failed => self.failed += n,
            RequestStatus::Timeout => self.timeout += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.timeout
    }
}

/// Durable queue of requests, their responses, and the audit log.
///
/// The store is the only component that changes a request's status. Every
/// status change happens in one transaction together with the response and
/// audit rows it implies, so a crash never leaves a terminal row without its
/// response or a response without a terminal row.
///
/// Implementations must be `Send + Sync` and safe for concurrent access from
/// several worker processes.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Verify the backend is reachable.
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Insert a `pending` row. Returns the assigned id.
    async fn enqueue(&self, request: NewRequest) -> Result<RequestId, StoreError>;

    /// Atomically claim up to `limit` pending rows whose deadline is after
    /// `now`, ordered by `(priority, created_at)`.
    ///
    /// Rows locked by a concurrent claimer are skipped rather than waited
    /// on. Claimed rows are committed as `processing` (with `processed_at =
    /// now`) before they are returned, and are returned in claim order.
    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Request>, StoreError>;

    /// Apply a terminal [`Outcome`] to a `processing` row: move its status,
    /// write its response, and append one audit entry, all in one
    /// transaction.
    ///
    /// Returns [`StoreError::InvalidTransition`] and writes nothing if the
    /// row is not currently `processing`.
    async fn complete(
        &self,
        id: RequestId,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Move every `pending` row whose deadline is at or before `now` to
    /// `timeout`, writing the expiry response and audit entry for each.
    /// Returns the reaped ids.
    async fn expire_pending(&self, now: DateTime<Utc>) -> Result<Vec<RequestId>, StoreError>;

    /// Move every `processing` row claimed at or before `claimed_before` to
    /// `timeout`. Returns the reaped ids.
    async fn reap_stalled(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<RequestId>, StoreError>;

    /// Fetch a request row.
    async fn get_request(&self, id: RequestId) -> Result<Option<Request>, StoreError>;

    /// Fetch the response for a request, if it has reached a terminal status.
    async fn get_response(&self, id: RequestId) -> Result<Option<Response>, StoreError>;

    /// Audit entries for a request, oldest first.
    async fn audit_log(&self, id: RequestId) -> Result<Vec<AuditLogEntry>, StoreError>;

    /// Queue depth per status.
    async fn status_counts(&self) -> Result<StatusCounts, StoreError>;

    /// Release backend resources. Further calls may fail.
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_counts_accumulate() {
        let mut counts = StatusCounts::default();
        counts.add(RequestStatus::Pending, 3);
        counts.add(RequestStatus::Timeout, 2);
        counts.add(RequestStatus::Pending, 1);
        assert_eq!(counts.pending, 4);
        assert_eq!(counts.timeout, 2);
        assert_eq!(counts.total(), 6);
    }
}
