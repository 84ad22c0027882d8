use std::collections::HashSet;

use chrono::{Duration, Utc};
use serde_json::json;

use relay_core::{NewRequest, Outcome, RequestId, RequestStatus};

use crate::error::StoreError;
use crate::store::QueueStore;

fn new_request(source: &str) -> NewRequest {
    NewRequest::new(
        "dialogue",
        "/npc/dialogue",
        source,
        json!({"npc": source, "text": "hello"}),
    )
}

/// Expire, claim and complete everything left behind by a previous test so
/// each test starts from an empty claimable set.
async fn reset(store: &dyn QueueStore) -> Result<(), StoreError> {
    let now = Utc::now();
    store.expire_pending(now).await?;
    loop {
        let batch = store.claim_batch(1000, now).await?;
        if batch.is_empty() {
            return Ok(());
        }
        for row in batch {
            store
                .complete(row.id, Outcome::completed(json!(null), 0), now)
                .await?;
        }
    }
}

/// Run the full queue store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if a store operation fails; assertion failures panic.
pub async fn run_store_conformance_tests(store: &dyn QueueStore) -> Result<(), StoreError> {
    test_health_check(store).await?;
    test_enqueue_and_get(store).await?;
    test_claim_order(store).await?;
    test_claim_respects_limit(store).await?;
    test_claim_skips_expired(store).await?;
    test_claimed_rows_are_not_reclaimed(store).await?;
    test_complete_writes_response_and_audit(store).await?;
    test_complete_requires_processing(store).await?;
    test_complete_is_write_once(store).await?;
    test_expire_pending(store).await?;
    test_reap_stalled(store).await?;
    test_concurrent_claims_are_disjoint(store).await?;
    test_status_counts(store).await?;
    Ok(())
}

async fn test_health_check(store: &dyn QueueStore) -> Result<(), StoreError> {
    store.health_check().await
}

async fn test_enqueue_and_get(store: &dyn QueueStore) -> Result<(), StoreError> {
    reset(store).await?;
    let id = store.enqueue(new_request("Guard_01").with_priority(2)).await?;
    let row = store
        .get_request(id)
        .await?
        .expect("enqueued row should exist");
    assert_eq!(row.id, id);
    assert_eq!(row.status, RequestStatus::Pending);
    assert_eq!(row.priority, 2);
    assert_eq!(row.source_key, "Guard_01");
    assert_eq!(row.request_data["text"], "hello");
    assert!(row.expires_at > row.created_at, "default ttl should apply");
    assert!(row.processed_at.is_none());
    assert!(store.get_response(id).await?.is_none());
    assert!(store.audit_log(id).await?.is_empty());
    assert!(store.get_request(RequestId::new(i64::MAX)).await?.is_none());
    Ok(())
}

async fn test_claim_order(store: &dyn QueueStore) -> Result<(), StoreError> {
    reset(store).await?;
    let low_first = store.enqueue(new_request("a").with_priority(9)).await?;
    let high = store.enqueue(new_request("b").with_priority(1)).await?;
    let low_second = store.enqueue(new_request("c").with_priority(9)).await?;
    let mid = store.enqueue(new_request("d").with_priority(5)).await?;

    let batch = store.claim_batch(10, Utc::now()).await?;
    let ids: Vec<RequestId> = batch.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![high, mid, low_first, low_second]);
    for row in &batch {
        assert_eq!(row.status, RequestStatus::Processing);
        assert!(row.processed_at.is_some());
    }
    Ok(())
}

async fn test_claim_respects_limit(store: &dyn QueueStore) -> Result<(), StoreError> {
    reset(store).await?;
    for i in 0..5 {
        store.enqueue(new_request(&format!("npc-{i}"))).await?;
    }
    let now = Utc::now();
    assert_eq!(store.claim_batch(2, now).await?.len(), 2);
    assert_eq!(store.claim_batch(2, now).await?.len(), 2);
    assert_eq!(store.claim_batch(2, now).await?.len(), 1);
    assert!(store.claim_batch(2, now).await?.is_empty());
    assert!(store.claim_batch(0, now).await?.is_empty());
    Ok(())
}

async fn test_claim_skips_expired(store: &dyn QueueStore) -> Result<(), StoreError> {
    reset(store).await?;
    let now = Utc::now();
    let expired = store
        .enqueue(new_request("late").with_expires_at(now - Duration::seconds(1)))
        .await?;
    let live = store.enqueue(new_request("on-time")).await?;

    let batch = store.claim_batch(10, Utc::now()).await?;
    let ids: Vec<RequestId> = batch.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![live]);

    let row = store.get_request(expired).await?.expect("row exists");
    assert_eq!(row.status, RequestStatus::Pending);
    Ok(())
}

async fn test_claimed_rows_are_not_reclaimed(store: &dyn QueueStore) -> Result<(), StoreError> {
    reset(store).await?;
    let id = store.enqueue(new_request("once")).await?;
    let first = store.claim_batch(10, Utc::now()).await?;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, id);
    assert!(store.claim_batch(10, Utc::now()).await?.is_empty());
    Ok(())
}

async fn test_complete_writes_response_and_audit(store: &dyn QueueStore) -> Result<(), StoreError> {
    reset(store).await?;
    let id = store.enqueue(new_request("Guard_01")).await?;
    store.claim_batch(1, Utc::now()).await?;

    let now = Utc::now();
    store
        .complete(id, Outcome::completed(json!({"reply": "Halt!"}), 120), now)
        .await?;

    let row = store.get_request(id).await?.expect("row exists");
    assert_eq!(row.status, RequestStatus::Completed);
    assert!(row.processed_at.is_some());

    let response = store.get_response(id).await?.expect("response written");
    assert!(response.error_message.is_none());
    assert_eq!(response.processing_time_ms, 120);
    assert_eq!(response.response_data["reply"], "Halt!");

    let audit = store.audit_log(id).await?;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].event_type, "completed");
    Ok(())
}

async fn test_complete_requires_processing(store: &dyn QueueStore) -> Result<(), StoreError> {
    reset(store).await?;
    let id = store.enqueue(new_request("unclaimed")).await?;
    let err = store
        .complete(id, Outcome::completed(json!(null), 1), Utc::now())
        .await
        .expect_err("completing a pending row must fail");
    assert!(matches!(
        err,
        StoreError::InvalidTransition {
            from: RequestStatus::Pending,
            ..
        }
    ));
    assert!(store.get_response(id).await?.is_none());
    assert!(store.audit_log(id).await?.is_empty());

    let missing = store
        .complete(
            RequestId::new(i64::MAX),
            Outcome::completed(json!(null), 1),
            Utc::now(),
        )
        .await
        .expect_err("completing a missing row must fail");
    assert!(matches!(missing, StoreError::NotFound(_)));
    Ok(())
}

async fn test_complete_is_write_once(store: &dyn QueueStore) -> Result<(), StoreError> {
    reset(store).await?;
    let id = store.enqueue(new_request("twice")).await?;
    store.claim_batch(1, Utc::now()).await?;
    store
        .complete(
            id,
            Outcome::failed("dispatch", "HTTP 500", json!({"error": "boom"}), 5),
            Utc::now(),
        )
        .await?;

    let err = store
        .complete(id, Outcome::completed(json!({"late": true}), 9), Utc::now())
        .await
        .expect_err("second completion must fail");
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    let row = store.get_request(id).await?.expect("row exists");
    assert_eq!(row.status, RequestStatus::Failed);
    let response = store.get_response(id).await?.expect("response exists");
    assert_eq!(response.error_message.as_deref(), Some("HTTP 500"));
    assert_eq!(store.audit_log(id).await?.len(), 1);
    Ok(())
}

async fn test_expire_pending(store: &dyn QueueStore) -> Result<(), StoreError> {
    reset(store).await?;
    let now = Utc::now();
    let stale = store
        .enqueue(new_request("stale").with_expires_at(now - Duration::seconds(1)))
        .await?;
    let fresh = store.enqueue(new_request("fresh")).await?;

    let reaped = store.expire_pending(Utc::now()).await?;
    assert!(reaped.contains(&stale));
    assert!(!reaped.contains(&fresh));

    let row = store.get_request(stale).await?.expect("row exists");
    assert_eq!(row.status, RequestStatus::Timeout);
    let response = store.get_response(stale).await?.expect("expiry response");
    assert_eq!(
        response.error_message.as_deref(),
        Some(relay_core::EXPIRED_BEFORE_CLAIM)
    );
    let audit = store.audit_log(stale).await?;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].event_type, "timeout");
    assert_eq!(audit[0].event_data["event"], "processing_timeout");

    // A reaped row is never claimable afterwards, even with a clock that
    // would have considered it live.
    let batch = store
        .claim_batch(10, now - Duration::seconds(10))
        .await?;
    assert!(batch.iter().all(|r| r.id != stale));
    Ok(())
}

async fn test_reap_stalled(store: &dyn QueueStore) -> Result<(), StoreError> {
    reset(store).await?;
    let claimed_at = Utc::now();
    let id = store.enqueue(new_request("stuck")).await?;
    store.claim_batch(1, claimed_at).await?;

    let none = store
        .reap_stalled(claimed_at - Duration::seconds(1), Utc::now())
        .await?;
    assert!(!none.contains(&id));

    let reaped = store
        .reap_stalled(claimed_at + Duration::seconds(1), Utc::now())
        .await?;
    assert!(reaped.contains(&id));
    let row = store.get_request(id).await?.expect("row exists");
    assert_eq!(row.status, RequestStatus::Timeout);
    let response = store.get_response(id).await?.expect("response");
    assert_eq!(
        response.error_message.as_deref(),
        Some(relay_core::PROCESSING_STALLED)
    );
    Ok(())
}

async fn test_concurrent_claims_are_disjoint(store: &dyn QueueStore) -> Result<(), StoreError> {
    reset(store).await?;
    let mut enqueued = HashSet::new();
    for i in 0..20 {
        enqueued.insert(store.enqueue(new_request(&format!("npc-{i}"))).await?);
    }

    let now = Utc::now();
    let claims = futures::future::join_all((0..8).map(|_| store.claim_batch(3, now))).await;

    let mut seen = HashSet::new();
    for claim in claims {
        for row in claim? {
            assert!(seen.insert(row.id), "row {} claimed twice", row.id);
        }
    }
    loop {
        let batch = store.claim_batch(3, now).await?;
        if batch.is_empty() {
            break;
        }
        for row in batch {
            assert!(seen.insert(row.id), "row {} claimed twice", row.id);
        }
    }
    assert_eq!(seen, enqueued);
    Ok(())
}

async fn test_status_counts(store: &dyn QueueStore) -> Result<(), StoreError> {
    reset(store).await?;
    let before = store.status_counts().await?;
    store.enqueue(new_request("x")).await?;
    store.enqueue(new_request("y")).await?;
    let claimed = store.claim_batch(1, Utc::now()).await?;
    let after = store.status_counts().await?;
    assert_eq!(claimed.len(), 1);
    assert_eq!(after.pending, before.pending + 1);
    assert_eq!(after.processing, before.processing + 1);
    assert_eq!(after.total(), before.total() + 2);
    Ok(())
}
