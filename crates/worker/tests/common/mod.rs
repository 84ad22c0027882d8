#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use relay_core::{Request, RequestId, RequestStatus};
use relay_dispatch::{DispatchError, Dispatcher, DynDispatcher, RouteTable};
use relay_gate::{Gate, GateConfig, SystemClock};
use relay_store::QueueStore;
use relay_store_memory::MemoryQueueStore;
use relay_worker::{Poller, Processor, Sweeper, WorkerConfig, WorkerStats};

/// What a [`ScriptedDispatcher`] does with every request.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed { delay: Duration, body: Value },
    Fail { status: u16, body: String },
}

/// A dispatcher that follows a fixed script and records what it saw.
pub struct ScriptedDispatcher {
    behavior: Behavior,
    seen: Mutex<Vec<Request>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedDispatcher {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(delay: Duration) -> Self {
        Self::new(Behavior::Succeed {
            delay,
            body: json!({"reply": "Halt! Who goes there?"}),
        })
    }

    pub fn seen(&self) -> Vec<Request> {
        self.seen.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Dispatcher for ScriptedDispatcher {
    async fn dispatch(&self, request: &Request) -> Result<Value, DispatchError> {
        self.seen.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match &self.behavior {
            Behavior::Succeed { delay, body } => {
                tokio::time::sleep(*delay).await;
                Ok(body.clone())
            }
            Behavior::Fail { status, body } => Err(DispatchError::Status {
                status: *status,
                body: body.clone(),
            }),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn health_check(&self) -> Result<(), DispatchError> {
        Ok(())
    }

    fn request_types(&self) -> Vec<String> {
        RouteTable::with_defaults().request_types()
    }
}

/// Store, processor, poller and sweeper wired together over one memory store.
pub struct Harness {
    pub store: Arc<MemoryQueueStore>,
    pub stats: Arc<WorkerStats>,
    pub processor: Arc<Processor>,
    pub poller: Arc<Poller>,
    pub sweeper: Sweeper,
}

pub fn fast_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval_ms: 10,
        batch_size: 10,
        worker_count: 4,
        max_processing_time_ms: 2_000,
        claim_backoff_ms: 10,
        cleanup_interval_ms: 20,
        stats_interval_ms: 50,
        stall_grace_ms: 1_000,
    }
}

pub fn harness(
    dispatcher: Arc<dyn DynDispatcher>,
    config: WorkerConfig,
    gate_config: &GateConfig,
) -> Harness {
    let store = Arc::new(MemoryQueueStore::new());
    let dyn_store: Arc<dyn QueueStore> = store.clone();
    let stats = Arc::new(WorkerStats::new());
    let gate = Arc::new(Gate::from_config(
        gate_config,
        dispatcher.request_types(),
        Arc::new(SystemClock),
    ));
    let processor = Arc::new(Processor::new(
        Arc::clone(&dyn_store),
        gate,
        dispatcher,
        Arc::clone(&stats),
        config.max_processing_time(),
    ));
    let poller = Arc::new(Poller::new(
        Arc::clone(&dyn_store),
        Arc::clone(&processor),
        Arc::clone(&stats),
        config.clone(),
    ));
    let sweeper = Sweeper::new(
        dyn_store,
        Arc::clone(&stats),
        config.cleanup_interval(),
        config.stall_after(),
    );
    Harness {
        store,
        stats,
        processor,
        poller,
        sweeper,
    }
}

/// Poll the store until `id` reaches a terminal status.
pub async fn wait_for_terminal(store: &dyn QueueStore, id: RequestId) -> RequestStatus {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(row) = store.get_request(id).await.unwrap() {
                if row.status.is_terminal() {
                    return row.status;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("row should reach a terminal status")
}

/// An HTTP server that answers every connection with the same status and
/// body. Returns its base URL.
pub async fn spawn_fixed_http_server(status_code: u16, body: &'static str) -> String {
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
                let response = format!(
                    "HTTP/1.1 {status_code} Status\r\n\
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
