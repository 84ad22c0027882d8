use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use relay_core::{NewRequest, RequestId, RequestStatus};
use relay_gate::hash_api_key;
use relay_server::app;
use relay_server::config::RelayConfig;
use relay_store::QueueStore;
use relay_store_memory::MemoryQueueStore;

/// Answer every connection with `200` and a fixed JSON body.
async fn spawn_downstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 16384];
                let _ = stream.read(&mut buf).await;
                let body = r#"{"reply":"Move along."}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\n\
                     Content-Type: application/json\r\n\
                     Content-Length: {}\r\n\
                     Connection: close\r\n\
                     \r\n\
                     {body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    format!("http://127.0.0.1:{port}")
}

async fn wait_for_terminal(store: &dyn QueueStore, id: RequestId) -> RequestStatus {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(row) = store.get_request(id).await.unwrap()
                && row.status.is_terminal()
            {
                return row.status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("row should reach a terminal status")
}

fn config_for(base_url: &str) -> RelayConfig {
    let toml = format!(
        r#"
        [worker]
        poll_interval_ms = 10
        cleanup_interval_ms = 20
        stats_interval_ms = 50

        [auth]
        mode = "api_key"
        api_key_hashes = ["{hash}"]

        [dispatch]
        base_url = "{base_url}"
        timeout_ms = 2000
        "#,
        hash = hash_api_key("guard-post-key"),
    );
    let config = RelayConfig::parse(&toml).unwrap();
    config.validate().unwrap();
    config
}

#[tokio::test]
async fn configured_service_relays_and_rejects() {
    let base_url = spawn_downstream().await;
    let config = config_for(&base_url);

    let store = Arc::new(MemoryQueueStore::new());
    let service = Arc::new(app::assemble(&config, store.clone()).unwrap());

    let accepted = store
        .enqueue(NewRequest::new(
            "dialogue",
            "/npc/dialogue",
            "Guard_01",
            json!({"text": "hello", "api_key": "guard-post-key"}),
        ))
        .await
        .unwrap();
    let refused = store
        .enqueue(NewRequest::new(
            "dialogue",
            "/npc/dialogue",
            "Guard_02",
            json!({"text": "hello", "api_key": "wrong"}),
        ))
        .await
        .unwrap();

    let token = CancellationToken::new();
    let run = tokio::spawn({
        let service = Arc::clone(&service);
        let token = token.clone();
        async move { service.run(token).await }
    });

    assert_eq!(
        wait_for_terminal(store.as_ref(), accepted).await,
        RequestStatus::Completed
    );
    assert_eq!(
        wait_for_terminal(store.as_ref(), refused).await,
        RequestStatus::Failed
    );

    let ok = store.get_response(accepted).await.unwrap().unwrap();
    assert_eq!(ok.response_data, json!({"reply": "Move along."}));
    let rejected = store.get_response(refused).await.unwrap().unwrap();
    assert!(
        rejected
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("invalid api key"))
    );

    token.cancel();
    let snapshot = run.await.unwrap().unwrap();
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.rejected, 1);
    assert!(store.is_closed());
}

#[tokio::test]
async fn empty_base_url_is_refused_before_startup() {
    let mut config = config_for("http://127.0.0.1:1");
    config.dispatch.base_url = String::new();
    assert!(config.validate().is_err());
    assert!(app::assemble(&config, Arc::new(MemoryQueueStore::new())).is_err());
}
