use thiserror::Error;

use relay_dispatch::DispatchError;
use relay_store::StoreError;
use relay_worker::ServiceError;

use crate::config::ConfigError;

/// Errors that can occur when running the relay server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The queue store could not be opened or migrated.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The downstream dispatcher could not be built.
    #[error("dispatcher error: {0}")]
    Dispatch(#[from] DispatchError),

    /// The worker service failed to start or stopped abnormally.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The configured backend is not compiled into this binary.
    #[error("store backend {0:?} is not available in this build")]
    BackendUnavailable(String),
}
