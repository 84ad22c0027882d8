use relay_core::{RequestId, RequestStatus};

/// Errors that can occur during queue store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or the connection was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend rejected or failed a statement.
    #[error("backend error: {0}")]
    Backend(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No row exists with the given id.
    #[error("request not found: {0}")]
    NotFound(RequestId),

    /// The row is not in a status that permits the requested transition.
    #[error("request {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },
}

impl StoreError {
    /// Returns `true` for infrastructure failures that a later tick may not
    /// hit again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Backend(_))
    }
}
