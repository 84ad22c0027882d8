use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use relay_core::{
    AuditLogEntry, NewRequest, Outcome, Request, RequestId, RequestStatus, Response,
};
use relay_store::{QueueStore, StatusCounts, StoreError};

#[derive(Default)]
struct Inner {
    next_id: i64,
    requests: BTreeMap<RequestId, Request>,
    responses: HashMap<RequestId, Response>,
    audit: Vec<AuditLogEntry>,
}

impl Inner {
    /// Apply a terminal outcome. Callers check the transition first.
    fn finish(&mut self, id: RequestId, outcome: Outcome, now: DateTime<Utc>) {
        let status = outcome.status;
        let (response, audit) = outcome.into_records(id, now);
        if let Some(row) = self.requests.get_mut(&id) {
            row.status = status;
            row.processed_at = Some(now);
        }
        self.responses.insert(id, response);
        self.audit.push(audit);
    }
}

/// In-memory implementation of [`QueueStore`].
#[derive(Default)]
pub struct MemoryQueueStore {
    inner: Mutex<Inner>,
    closed: AtomicBool,
    failing_claims: AtomicU32,
}

impl MemoryQueueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `claim_batch` fail with a connection
    /// error. Used to exercise tick-level retry.
    pub fn fail_next_claims(&self, n: u32) {
        self.failing_claims.store(n, Ordering::SeqCst);
    }

    /// Whether [`QueueStore::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Connection("store is closed".into()));
        }
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store mutex poisoned".into()))
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_claims
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn enqueue(&self, request: NewRequest) -> Result<RequestId, StoreError> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = RequestId::new(inner.next_id);
        let row = request.into_request(id, Utc::now());
        inner.requests.insert(id, row);
        Ok(id)
    }

    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Request>, StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Connection("injected claim failure".into()));
        }
        let mut inner = self.lock()?;

        let mut candidates: Vec<(i32, DateTime<Utc>, RequestId)> = inner
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending && !r.is_expired_at(now))
            .map(Request::claim_order)
            .collect();
        candidates.sort_unstable();
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, _, id) in candidates {
            if let Some(row) = inner.requests.get_mut(&id) {
                row.status = RequestStatus::Processing;
                row.processed_at = Some(now);
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn complete(
        &self,
        id: RequestId,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let current = inner
            .requests
            .get(&id)
            .map(|r| r.status)
            .ok_or(StoreError::NotFound(id))?;
        if current != RequestStatus::Processing || !current.can_transition_to(outcome.status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: current,
                to: outcome.status,
            });
        }
        inner.finish(id, outcome, now);
        Ok(())
    }

    async fn expire_pending(&self, now: DateTime<Utc>) -> Result<Vec<RequestId>, StoreError> {
        let mut inner = self.lock()?;
        let expired: Vec<RequestId> = inner
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending && r.is_expired_at(now))
            .map(|r| r.id)
            .collect();
        for id in &expired {
            inner.finish(*id, Outcome::expired(), now);
        }
        Ok(expired)
    }

    async fn reap_stalled(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<RequestId>, StoreError> {
        let mut inner = self.lock()?;
        let stalled: Vec<(RequestId, DateTime<Utc>)> = inner
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Processing)
            .filter_map(|r| r.processed_at.map(|at| (r.id, at)))
            .filter(|(_, at)| *at <= claimed_before)
            .collect();
        for (id, claimed_at) in &stalled {
            let held_ms = (now - *claimed_at).num_milliseconds();
            inner.finish(*id, Outcome::stalled(held_ms), now);
        }
        Ok(stalled.into_iter().map(|(id, _)| id).collect())
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<Request>, StoreError> {
        Ok(self.lock()?.requests.get(&id).cloned())
    }

    async fn get_response(&self, id: RequestId) -> Result<Option<Response>, StoreError> {
        Ok(self.lock()?.responses.get(&id).cloned())
    }

    async fn audit_log(&self, id: RequestId) -> Result<Vec<AuditLogEntry>, StoreError> {
        Ok(self
            .lock()?
            .audit
            .iter()
            .filter(|e| e.request_id == id)
            .cloned()
            .collect())
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let inner = self.lock()?;
        let mut counts = StatusCounts::default();
        for row in inner.requests.values() {
            counts.add(row.status, 1);
        }
        Ok(counts)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_conformance() {
        let store = MemoryQueueStore::new();
        relay_store::testing::run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn injected_claim_failures_are_consumed() {
        let store = MemoryQueueStore::new();
        store
            .enqueue(NewRequest::new("dialogue", "/npc/dialogue", "a", json!({})))
            .await
            .unwrap();
        store.fail_next_claims(2);

        assert!(store.claim_batch(5, Utc::now()).await.is_err());
        assert!(store.claim_batch(5, Utc::now()).await.is_err());
        assert_eq!(store.claim_batch(5, Utc::now()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closed_store_fails_health_check() {
        let store = MemoryQueueStore::new();
        store.health_check().await.unwrap();
        store.close().await;
        assert!(store.is_closed());
        assert!(matches!(
            store.health_check().await,
            Err(StoreError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_claims_from_tasks_never_overlap() {
        let store = std::sync::Arc::new(MemoryQueueStore::new());
        for i in 0..50 {
            store
                .enqueue(NewRequest::new("decision", "/npc/decision", format!("npc-{i}"), json!({})))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                loop {
                    let batch = store.claim_batch(4, Utc::now()).await.unwrap();
                    if batch.is_empty() {
                        return ids;
                    }
                    ids.extend(batch.into_iter().map(|r| r.id));
                    tokio::task::yield_now().await;
                }
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: std::collections::HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), 50);
        assert_eq!(unique.len(), 50);
    }
}
