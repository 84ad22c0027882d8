//! Process wiring for the relay worker: TOML configuration, tracing setup,
//! queue store selection and signal handling.

pub mod app;
pub mod config;
pub mod error;
pub mod shutdown;
pub mod store_factory;
pub mod telemetry;
