mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use relay_core::{NewRequest, RequestStatus};
use relay_dispatch::DynDispatcher;
use relay_gate::{Gate, GateConfig, SystemClock};
use relay_store::QueueStore;
use relay_store_memory::MemoryQueueStore;
use relay_worker::{LifecycleState, RelayService, ServiceError, WorkerConfig};

use common::{ScriptedDispatcher, fast_config, wait_for_terminal};

fn service(store: Arc<MemoryQueueStore>, config: WorkerConfig) -> Arc<RelayService> {
    let dispatcher: Arc<dyn DynDispatcher> =
        Arc::new(ScriptedDispatcher::succeeding(Duration::from_millis(5)));
    let gate = Arc::new(Gate::from_config(
        &GateConfig::default(),
        dispatcher.request_types(),
        Arc::new(SystemClock),
    ));
    Arc::new(RelayService::new(store, gate, dispatcher, config))
}

async fn wait_until_running(service: &RelayService) {
    let mut states = service.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == LifecycleState::Running),
    )
    .await
    .expect("service should start")
    .expect("state channel open");
}

#[tokio::test]
async fn service_processes_then_drains_and_stops() {
    let store = Arc::new(MemoryQueueStore::new());
    let svc = service(Arc::clone(&store), fast_config());
    assert_eq!(svc.state(), LifecycleState::Created);

    let token = CancellationToken::new();
    let run = tokio::spawn({
        let svc = Arc::clone(&svc);
        let token = token.clone();
        async move { svc.run(token).await }
    });
    wait_until_running(&svc).await;

    let id = store
        .enqueue(NewRequest::new(
            "dialogue",
            "/npc/dialogue",
            "Guard_01",
            json!({"text": "hello"}),
        ))
        .await
        .unwrap();
    assert_eq!(
        wait_for_terminal(store.as_ref(), id).await,
        RequestStatus::Completed
    );

    token.cancel();
    let snapshot = run.await.unwrap().expect("service should stop cleanly");
    assert_eq!(snapshot.completed, 1);
    assert_eq!(svc.state(), LifecycleState::Stopped);
    assert!(store.is_closed());
}

#[tokio::test]
async fn sweeper_runs_under_the_service() {
    let store = Arc::new(MemoryQueueStore::new());
    let svc = service(Arc::clone(&store), fast_config());

    let id = store
        .enqueue(
            NewRequest::new("dialogue", "/npc/dialogue", "Guard_01", json!({}))
                .with_expires_at(Utc::now() - chrono::Duration::seconds(1)),
        )
        .await
        .unwrap();

    let token = CancellationToken::new();
    let run = tokio::spawn({
        let svc = Arc::clone(&svc);
        let token = token.clone();
        async move { svc.run(token).await }
    });

    assert_eq!(
        wait_for_terminal(store.as_ref(), id).await,
        RequestStatus::Timeout
    );
    token.cancel();
    let snapshot = run.await.unwrap().unwrap();
    assert_eq!(snapshot.expired, 1);
    assert_eq!(snapshot.processed, 0);
}

#[tokio::test]
async fn shutdown_interrupts_idle_sleep() {
    let store = Arc::new(MemoryQueueStore::new());
    let config = WorkerConfig {
        poll_interval_ms: 60_000,
        cleanup_interval_ms: 60_000,
        stats_interval_ms: 60_000,
        ..fast_config()
    };
    let svc = service(store, config);

    let token = CancellationToken::new();
    let run = tokio::spawn({
        let svc = Arc::clone(&svc);
        let token = token.clone();
        async move { svc.run(token).await }
    });
    wait_until_running(&svc).await;
    // Let the poller reach its idle sleep.
    tokio::time::sleep(Duration::from_millis(20)).await;

    token.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("shutdown should not wait for the poll interval");
    assert!(result.unwrap().is_ok());
}

#[tokio::test]
async fn failed_health_check_aborts_startup() {
    let store = Arc::new(MemoryQueueStore::new());
    store.close().await;
    let svc = service(store, fast_config());

    let err = svc.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ServiceError::HealthCheck(_)));
    assert_eq!(svc.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn service_cannot_be_started_twice() {
    let store = Arc::new(MemoryQueueStore::new());
    let svc = service(store, fast_config());

    let token = CancellationToken::new();
    token.cancel();
    svc.run(token.clone()).await.unwrap();

    let err = svc.run(token).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::AlreadyStarted(LifecycleState::Stopped)
    ));
}
