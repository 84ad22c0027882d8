use async_trait::async_trait;

use relay_core::Request;

use crate::error::DispatchError;

/// Sends one admitted request downstream and returns the normalized
/// response payload.
///
/// A dispatcher never touches the queue store. It maps a row to either a
/// success payload or a typed [`DispatchError`]; the processor decides what
/// status that becomes.
///
/// This trait uses native `async fn` and is not object-safe. Hold a
/// dispatcher behind `Arc<dyn DynDispatcher>` instead; every `Dispatcher`
/// implements [`DynDispatcher`] through a blanket implementation.
pub trait Dispatcher: Send + Sync {
    fn dispatch(
        &self,
        request: &Request,
    ) -> impl std::future::Future<Output = Result<serde_json::Value, DispatchError>> + Send;

    /// Verify the downstream service is reachable.
    fn health_check(&self) -> impl std::future::Future<Output = Result<(), DispatchError>> + Send;

    /// Request types this dispatcher can route. Anything else is rejected
    /// before dispatch.
    fn request_types(&self) -> Vec<String>;
}

/// Object-safe dispatcher for use behind `Arc<dyn DynDispatcher>`.
#[async_trait]
pub trait DynDispatcher: Send + Sync {
    async fn dispatch(&self, request: &Request) -> Result<serde_json::Value, DispatchError>;

    async fn health_check(&self) -> Result<(), DispatchError>;

    fn request_types(&self) -> Vec<String>;
}

#[async_trait]
impl<T: Dispatcher + Sync> DynDispatcher for T {
    async fn dispatch(&self, request: &Request) -> Result<serde_json::Value, DispatchError> {
        Dispatcher::dispatch(self, request).await
    }

    async fn health_check(&self) -> Result<(), DispatchError> {
        Dispatcher::health_check(self).await
    }

    fn request_types(&self) -> Vec<String> {
        Dispatcher::request_types(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;

    use relay_core::{NewRequest, RequestId};

    use super::*;

    struct EchoDispatcher {
        fail: bool,
    }

    impl Dispatcher for EchoDispatcher {
        async fn dispatch(&self, request: &Request) -> Result<serde_json::Value, DispatchError> {
            if self.fail {
                Err(DispatchError::Status {
                    status: 500,
                    body: "down".into(),
                })
            } else {
                Ok(json!({ "echo": request.request_data }))
            }
        }

        async fn health_check(&self) -> Result<(), DispatchError> {
            Ok(())
        }

        fn request_types(&self) -> Vec<String> {
            vec!["dialogue".into()]
        }
    }

    fn row() -> Request {
        NewRequest::new("dialogue", "/npc/dialogue", "Guard_01", json!({"text": "hi"}))
            .into_request(RequestId::new(1), Utc::now())
    }

    #[tokio::test]
    async fn blanket_impl_forwards() {
        let ok: Arc<dyn DynDispatcher> = Arc::new(EchoDispatcher { fail: false });
        let body = ok.dispatch(&row()).await.unwrap();
        assert_eq!(body["echo"]["text"], "hi");
        assert_eq!(ok.request_types(), vec!["dialogue".to_owned()]);
        assert!(ok.health_check().await.is_ok());

        let failing: Arc<dyn DynDispatcher> = Arc::new(EchoDispatcher { fail: true });
        let err = failing.dispatch(&row()).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
    }
}
