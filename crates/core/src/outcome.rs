use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::request::RequestStatus;
use crate::response::{AuditLogEntry, Response};
use crate::types::RequestId;

/// Error message recorded for rows reaped before anyone claimed them.
pub const EXPIRED_BEFORE_CLAIM: &str = "expired before claim";

/// Error message recorded for rows left in `processing` past their budget.
pub const PROCESSING_STALLED: &str = "processing stalled";

/// Terminal result proposed for a request.
///
/// Produced by the processor (or the sweeper) and applied by the store in a
/// single transaction that moves the status, writes the [`Response`] and
/// appends one [`AuditLogEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Terminal status to move to.
    pub status: RequestStatus,
    pub response_data: serde_json::Value,
    /// `None` only for [`RequestStatus::Completed`].
    pub error_message: Option<String>,
    pub processing_time_ms: i64,
    /// Detail written to the audit entry.
    pub event_data: serde_json::Value,
}

impl Outcome {
    /// Downstream call succeeded.
    #[must_use]
    pub fn completed(response_data: serde_json::Value, processing_time_ms: i64) -> Self {
        Self {
            status: RequestStatus::Completed,
            response_data,
            error_message: None,
            processing_time_ms,
            event_data: json!({ "processing_time_ms": processing_time_ms }),
        }
    }

    /// Rejected by the gate or by the downstream service. `stage` names the
    /// step that failed (`auth`, `rate_limit`, `validate`, `dispatch`).
    #[must_use]
    pub fn failed(
        stage: &str,
        error_message: impl Into<String>,
        response_data: serde_json::Value,
        processing_time_ms: i64,
    ) -> Self {
        let error_message = error_message.into();
        Self {
            status: RequestStatus::Failed,
            response_data,
            event_data: json!({
                "stage": stage,
                "error": error_message,
                "processing_time_ms": processing_time_ms,
            }),
            error_message: Some(error_message),
            processing_time_ms,
        }
    }

    /// Downstream call exceeded the processing budget.
    #[must_use]
    pub fn timed_out(error_message: impl Into<String>, processing_time_ms: i64) -> Self {
        let error_message = error_message.into();
        Self {
            status: RequestStatus::Timeout,
            response_data: json!({ "error": error_message }),
            event_data: json!({
                "event": "processing_timeout",
                "reason": error_message,
                "processing_time_ms": processing_time_ms,
            }),
            error_message: Some(error_message),
            processing_time_ms,
        }
    }

    /// Row passed its deadline while still pending.
    #[must_use]
    pub fn expired() -> Self {
        Self {
            status: RequestStatus::Timeout,
            response_data: json!({ "error": EXPIRED_BEFORE_CLAIM }),
            error_message: Some(EXPIRED_BEFORE_CLAIM.to_owned()),
            processing_time_ms: 0,
            event_data: json!({
                "event": "processing_timeout",
                "reason": EXPIRED_BEFORE_CLAIM,
            }),
        }
    }

    /// Row sat in `processing` longer than any worker could legitimately
    /// hold it.
    #[must_use]
    pub fn stalled(held_ms: i64) -> Self {
        Self {
            status: RequestStatus::Timeout,
            response_data: json!({ "error": PROCESSING_STALLED }),
            error_message: Some(PROCESSING_STALLED.to_owned()),
            processing_time_ms: held_ms,
            event_data: json!({
                "event": "processing_timeout",
                "reason": PROCESSING_STALLED,
                "held_ms": held_ms,
            }),
        }
    }

    /// Audit event type; mirrors the terminal status.
    pub fn event_type(&self) -> &'static str {
        self.status.as_str()
    }

    /// Split into the response row and audit entry for `request_id`.
    pub fn into_records(self, request_id: RequestId, now: DateTime<Utc>) -> (Response, AuditLogEntry) {
        let audit = AuditLogEntry {
            request_id,
            event_type: self.event_type().to_owned(),
            event_data: self.event_data,
            timestamp: now,
        };
        let response = Response {
            request_id,
            response_data: self.response_data,
            error_message: self.error_message,
            processing_time_ms: self.processing_time_ms,
            created_at: now,
        };
        (response, audit)
    }
}
