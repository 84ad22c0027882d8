use std::sync::Arc;

use tracing::info;

use relay_dispatch::{DynDispatcher, HttpDispatcher};
use relay_gate::{Gate, SystemClock};
use relay_store::QueueStore;
use relay_worker::RelayService;

use crate::config::RelayConfig;
use crate::error::ServerError;
use crate::store_factory;

/// Open the store and assemble the gate, HTTP dispatcher and worker service
/// described by `config`. The service is returned in `created`; call
/// [`RelayService::run`] to start it.
pub async fn build_service(config: &RelayConfig) -> Result<RelayService, ServerError> {
    let store = store_factory::create_store(&config.store).await?;
    assemble(config, store)
}

/// Wire an already opened `store` into a service.
pub fn assemble(
    config: &RelayConfig,
    store: Arc<dyn QueueStore>,
) -> Result<RelayService, ServerError> {
    let dispatcher: Arc<dyn DynDispatcher> =
        Arc::new(HttpDispatcher::from_config(&config.dispatch)?);
    let request_types = dispatcher.request_types();
    let gate = Arc::new(Gate::from_config(
        &config.gate_config(),
        request_types.clone(),
        Arc::new(SystemClock),
    ));

    info!(
        backend = %config.store.backend,
        base_url = %config.dispatch.base_url,
        request_types = ?request_types,
        batch_size = config.worker.batch_size,
        worker_count = config.worker.worker_count,
        auth_mode = ?config.auth.mode,
        "relay service assembled"
    );

    Ok(RelayService::new(
        store,
        gate,
        dispatcher,
        config.worker.clone(),
    ))
}
