use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RequestId;

/// Result row written exactly once when a request reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Owning request.
    pub request_id: RequestId,
    /// Downstream payload on success, or an error body.
    pub response_data: serde_json::Value,
    /// `None` on success.
    pub error_message: Option<String>,
    /// Wall-clock time spent gating and dispatching the request.
    pub processing_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl Response {
    /// Whether the response carries a successful result.
    pub fn is_success(&self) -> bool {
        self.error_message.is_none()
    }
}

/// Append-only audit record for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub request_id: RequestId,
    /// Mirrors the terminal status (`completed`, `failed`, `timeout`).
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
