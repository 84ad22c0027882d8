mod store;
mod telemetry;


pub use store::*;
pub use telemetry::*;

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use relay_dispatch::DispatchConfig;
use relay_gate::{AuthConfig, AuthMode, GateConfig, RateLimitConfig, ValidationConfig};
use relay_worker::WorkerConfig;

/// Environment variable that overrides `store.url`.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Errors raised while loading or validating [`RelayConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration for the relay worker, loaded from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    /// Queue store backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// Poller, sweeper and reporter tuning.
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Downstream service and route table overrides.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl RelayConfig {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist, then apply `DATABASE_URL`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            Self::parse(&contents)?
        } else {
            Self::default()
        };
        config.apply_database_url(std::env::var(DATABASE_URL_ENV).ok());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Replace `store.url` with `url` when it is set and non-empty.
    pub fn apply_database_url(&mut self, url: Option<String>) {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.store.url = Some(url);
        }
    }

    /// The gate sections bundled for [`relay_gate::Gate::from_config`].
    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            auth: self.auth.clone(),
            rate_limit: self.rate_limit.clone(),
            validation: self.validation.clone(),
        }
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));

        match self.store.backend.as_str() {
            "memory" => {}
            "postgres" => {
                if self.store.url.as_deref().is_none_or(str::is_empty) {
                    return invalid("store.url (or DATABASE_URL) is required for the postgres backend");
                }
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown store backend: {other}"
                )));
            }
        }

        if self.worker.batch_size == 0 {
            return invalid("worker.batch_size must be at least 1");
        }
        if self.worker.worker_count == 0 {
            return invalid("worker.worker_count must be at least 1");
        }
        if self.worker.max_processing_time_ms == 0 {
            return invalid("worker.max_processing_time_ms must be at least 1");
        }
        if self.dispatch.base_url.trim().is_empty() {
            return invalid("dispatch.base_url must not be empty");
        }
        if self.auth.mode == AuthMode::ApiKey && self.auth.api_key_hashes.is_empty() {
            return invalid("auth.mode = \"api_key\" requires at least one entry in auth.api_key_hashes");
        }
        if self.rate_limit.enabled && self.rate_limit.window_seconds == 0 {
            return invalid("rate_limit.window_seconds must be at least 1");
        }
        Ok(())
    }
}
