use std::time::Duration;

use thiserror::Error;

/// Errors a dispatcher reports back to the processor.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The downstream service answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The call did not finish within the allowed duration.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A network or transport-level error occurred.
    #[error("connection error: {0}")]
    Connection(String),

    /// No route is registered for the request type.
    #[error("no route for request type: {0}")]
    NoRoute(String),

    /// The request body or response could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The dispatcher was given invalid configuration.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl DispatchError {
    /// Whether the failure should be classified as a processing timeout
    /// rather than a rejection.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns `true` if the error is transient and a later attempt might
    /// succeed. Relay never retries a row itself; this feeds logging only.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) => true,
            Self::Status { status, .. } => *status == 429 || (500..600).contains(status),
            Self::NoRoute(_) | Self::Serialization(_) | Self::Configuration(_) => false,
        }
    }

    /// HTTP status, when the downstream service produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(DispatchError::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(!DispatchError::Connection("reset".into()).is_timeout());

        assert!(DispatchError::Connection("reset".into()).is_retryable());
        assert!(
            DispatchError::Status {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !DispatchError::Status {
                status: 400,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!DispatchError::NoRoute("x".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = DispatchError::Status {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.to_string(), "HTTP 500: boom");
        assert_eq!(err.status(), Some(500));

        let err = DispatchError::Timeout(Duration::from_millis(500));
        assert_eq!(err.to_string(), "timeout after 500ms");
        assert_eq!(err.status(), None);
    }
}
