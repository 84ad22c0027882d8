use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::RequestId;

/// Deadline applied to requests enqueued without an explicit `expires_at`.
pub const DEFAULT_TTL_SECONDS: i64 = 30;

/// Priority applied to requests enqueued without an explicit priority.
/// Lower values are claimed first.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Lifecycle status of a queued request.
///
/// Status only moves forward: `pending -> processing -> {completed, failed,
/// timeout}`. The sweeper may also move an expired `pending` row straight to
/// `timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl RequestStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Timeout,
    ];

    /// The stored (wire) representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    /// Whether no further transition can happen from this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    /// Whether moving from `self` to `next` respects forward-only ordering.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Processing | Self::Timeout),
            Self::Processing => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Timeout => false,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            other => Err(CoreError::UnknownStatus(other.to_owned())),
        }
    }
}

/// One unit of work in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Store-assigned identifier.
    pub id: RequestId,

    /// Category used for routing and rate-limit bucketing (e.g. `dialogue`).
    pub request_type: String,

    /// Logical downstream path (e.g. `/npc/dialogue`).
    pub endpoint: String,

    /// Structured payload, opaque to the queue.
    pub request_data: serde_json::Value,

    /// Originating identity (NPC, session) used for per-source rate limits
    /// and auditing.
    pub source_key: String,

    /// Claim priority. Lower sorts first.
    pub priority: i32,

    /// Current lifecycle status.
    pub status: RequestStatus,

    /// Insertion time.
    pub created_at: DateTime<Utc>,

    /// Deadline after which an unclaimed row is stale.
    pub expires_at: DateTime<Utc>,

    /// Stamped when the row is claimed, then overwritten at the terminal
    /// transition.
    pub processed_at: Option<DateTime<Utc>>,
}

impl Request {
    /// Whether the claim deadline has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Sort key used when claiming: `(priority, created_at, id)`.
    pub fn claim_order(&self) -> (i32, DateTime<Utc>, RequestId) {
        (self.priority, self.created_at, self.id)
    }
}

/// A request as submitted by a producer, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRequest {
    pub request_type: String,
    pub endpoint: String,
    pub request_data: serde_json::Value,
    pub source_key: String,
    /// Defaults to [`DEFAULT_PRIORITY`].
    #[serde(default)]
    pub priority: Option<i32>,
    /// Defaults to `now + DEFAULT_TTL_SECONDS`.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewRequest {
    /// Create a new request with default priority and deadline.
    #[must_use]
    pub fn new(
        request_type: impl Into<String>,
        endpoint: impl Into<String>,
        source_key: impl Into<String>,
        request_data: serde_json::Value,
    ) -> Self {
        Self {
            request_type: request_type.into(),
            endpoint: endpoint.into(),
            request_data,
            source_key: source_key.into(),
            priority: None,
            expires_at: None,
        }
    }

    /// Set the claim priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set an absolute deadline.
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the deadline relative to `now`.
    #[must_use]
    pub fn expiring_in(self, now: DateTime<Utc>, ttl: Duration) -> Self {
        self.with_expires_at(now + ttl)
    }

    /// Effective priority.
    pub fn resolved_priority(&self) -> i32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    /// Effective deadline for a row created at `now`.
    pub fn resolved_expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.expires_at
            .unwrap_or_else(|| now + Duration::seconds(DEFAULT_TTL_SECONDS))
    }

    /// Materialize the row the store will persist.
    pub fn into_request(self, id: RequestId, now: DateTime<Utc>) -> Request {
        let priority = self.resolved_priority();
        let expires_at = self.resolved_expires_at(now);
        Request {
            id,
            request_type: self.request_type,
            endpoint: self.endpoint,
            request_data: self.request_data,
            source_key: self.source_key,
            priority,
            status: RequestStatus::Pending,
            created_at: now,
            expires_at,
            processed_at: None,
        }
    }
}
