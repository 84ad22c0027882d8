use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use relay_core::Request;

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::route::{HttpMethod, Route, RouteTable};

/// `[dispatch]` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Base URL of the downstream service; row endpoints are appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-call HTTP timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Route overrides layered on the built-in table, keyed by request type.
    #[serde(default)]
    pub routes: HashMap<String, Route>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            routes: HashMap::new(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_owned()
}

fn default_timeout_ms() -> u64 {
    25_000
}

/// Dispatches requests to an HTTP service using a [`RouteTable`].
pub struct HttpDispatcher {
    base_url: String,
    timeout: Duration,
    routes: RouteTable,
    client: Client,
}

impl HttpDispatcher {
    /// Build a dispatcher with its own `reqwest::Client`.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        routes: RouteTable,
    ) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(base_url, timeout, routes, client))
    }

    /// Build a dispatcher around an existing client, sharing its pool.
    pub fn with_client(
        base_url: impl Into<String>,
        timeout: Duration,
        routes: RouteTable,
        client: Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            timeout,
            routes,
            client,
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Result<Self, DispatchError> {
        if config.base_url.trim().is_empty() {
            return Err(DispatchError::Configuration("base_url is empty".into()));
        }
        Self::new(
            config.base_url.clone(),
            Duration::from_millis(config.timeout_ms),
            RouteTable::from_overrides(&config.routes),
        )
    }

    fn map_send_error(&self, e: &reqwest::Error) -> DispatchError {
        if e.is_timeout() {
            warn!(timeout = ?self.timeout, "downstream call timed out");
            DispatchError::Timeout(self.timeout)
        } else {
            DispatchError::Connection(e.to_string())
        }
    }

    /// Scalar top-level fields of `request_data`, as query parameters. The
    /// row's own `request_id` always wins over a field of the same name.
    fn query_pairs(request: &Request) -> Vec<(String, String)> {
        let mut pairs = vec![("request_id".to_owned(), request.id.to_string())];
        if let Some(obj) = request.request_data.as_object() {
            for (k, v) in obj {
                if k == "request_id" {
                    continue;
                }
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                pairs.push((k.clone(), value));
            }
        }
        pairs
    }
}

impl Dispatcher for HttpDispatcher {
    #[instrument(
        skip(self, request),
        fields(request_id = %request.id, request_type = %request.request_type)
    )]
    async fn dispatch(&self, request: &Request) -> Result<serde_json::Value, DispatchError> {
        let (route, path) = self
            .routes
            .resolve(request)
            .ok_or_else(|| DispatchError::NoRoute(request.request_type.clone()))?;
        let url = format!("{}{path}", self.base_url);

        debug!(method = route.method.as_str(), url = %url, "dispatching request");

        let builder = match route.method {
            HttpMethod::Get => self.client.get(&url).query(&Self::query_pairs(request)),
            HttpMethod::Post => {
                let body = serde_json::to_vec(&request.request_data)
                    .map_err(|e| DispatchError::Serialization(e.to_string()))?;
                self.client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .body(body)
            }
        };

        let response = builder
            .header("X-Relay-Request-Id", request.id.to_string())
            .header("X-Relay-Source-Key", &request.source_key)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "downstream returned error status");
            return Err(DispatchError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        // Best-effort JSON, falling back to the raw text.
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| {
            serde_json::json!({
                "status_code": status.as_u16(),
                "body": text,
            })
        }))
    }

    async fn health_check(&self) -> Result<(), DispatchError> {
        let response = self
            .client
            .head(&self.base_url)
            .send()
            .await
            .map_err(|e| DispatchError::Connection(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(DispatchError::Connection(format!(
                "health check failed: HTTP {status}"
            )));
        }
        Ok(())
    }

    fn request_types(&self) -> Vec<String> {
        self.routes.request_types()
    }
}
