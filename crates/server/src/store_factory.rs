use std::sync::Arc;

use tracing::info;

use relay_store::QueueStore;
use relay_store_memory::MemoryQueueStore;

use crate::config::StoreConfig;
use crate::error::ServerError;

/// Open the configured queue store. Backends that keep a schema run their
/// migrations here, so `migrate` is just this call followed by `close`.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn QueueStore>, ServerError> {
    match config.backend.as_str() {
        "memory" => {
            info!("using in-memory queue store");
            Ok(Arc::new(MemoryQueueStore::new()))
        }
        "postgres" => create_postgres(config).await,
        other => Err(ServerError::BackendUnavailable(other.to_owned())),
    }
}

#[cfg(feature = "postgres")]
async fn create_postgres(config: &StoreConfig) -> Result<Arc<dyn QueueStore>, ServerError> {
    use relay_store_postgres::{PostgresConfig, PostgresQueueStore};

    let url = config.url.clone().ok_or_else(|| {
        crate::config::ConfigError::Invalid("store.url is required for the postgres backend".into())
    })?;
    let pg_config = PostgresConfig {
        url,
        pool_size: config.pool_size,
        acquire_timeout: std::time::Duration::from_secs(config.acquire_timeout_seconds),
        schema: config.schema.clone(),
        ssl_mode: config.ssl_mode.clone(),
        ssl_root_cert: config.ssl_root_cert.clone(),
    };
    let store = PostgresQueueStore::new(pg_config).await?;
    info!(schema = %config.schema, "postgres queue store ready");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn create_postgres(config: &StoreConfig) -> Result<Arc<dyn QueueStore>, ServerError> {
    Err(ServerError::BackendUnavailable(config.backend.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_is_healthy() {
        let store = create_store(&StoreConfig::default()).await.unwrap();
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_backend_is_unavailable() {
        let config = StoreConfig {
            backend: "redis".to_owned(),
            ..StoreConfig::default()
        };
        let err = create_store(&config).await.err().unwrap();
        assert!(matches!(err, ServerError::BackendUnavailable(b) if b == "redis"));
    }
}
