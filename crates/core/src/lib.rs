//! Core types shared by every relay crate: queued requests, their terminal
//! responses, the append-only audit log, and the [`Outcome`] a worker
//! proposes when it finishes with a row.

pub mod error;
pub mod outcome;
pub mod request;
pub mod response;
pub mod types;

pub use error::CoreError;
pub use outcome::{EXPIRED_BEFORE_CLAIM, Outcome, PROCESSING_STALLED};
pub use request::{DEFAULT_PRIORITY, DEFAULT_TTL_SECONDS, NewRequest, Request, RequestStatus};
pub use response::{AuditLogEntry, Response};
pub use types::RequestId;
