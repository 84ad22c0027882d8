use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use relay_core::Request;

/// Field in `request_data` that carries the caller's credential.
pub const CREDENTIAL_FIELD: &str = "api_key";

/// How claimed requests are authenticated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Every request passes.
    #[default]
    None,
    /// Requests must carry a key whose SHA-256 hash is configured.
    ApiKey,
}

/// `[auth]` configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Lowercase hex SHA-256 hashes of accepted keys.
    #[serde(default)]
    pub api_key_hashes: Vec<String>,
    /// Request types allowed through. Empty allows every type.
    #[serde(default)]
    pub allowed_request_types: Vec<String>,
    #[serde(default)]
    pub blocked_sources: Vec<String>,
}

/// Reasons the auth stage rejects a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing api key")]
    MissingApiKey,

    #[error("invalid api key")]
    InvalidApiKey,

    #[error("request type not allowed: {0}")]
    RequestTypeNotAllowed(String),

    #[error("source blocked: {0}")]
    SourceBlocked(String),
}

/// Hash a raw API key to the configured format (lowercase hex SHA-256).
pub fn hash_api_key(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// First stage of the gate.
#[derive(Debug, Clone)]
pub struct AuthGate {
    mode: AuthMode,
    key_hashes: Vec<String>,
    allowed_types: HashSet<String>,
    blocked_sources: HashSet<String>,
}

impl AuthGate {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            mode: config.mode,
            key_hashes: config
                .api_key_hashes
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            allowed_types: config.allowed_request_types.iter().cloned().collect(),
            blocked_sources: config.blocked_sources.iter().cloned().collect(),
        }
    }

    /// A gate that lets everything through.
    pub fn disabled() -> Self {
        Self::new(&AuthConfig::default())
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Check a request. The block list is consulted before the credential so
    /// a valid key never unblocks a source.
    pub fn check(&self, request: &Request) -> Result<(), AuthError> {
        if self.mode == AuthMode::None {
            return Ok(());
        }
        if self.blocked_sources.contains(&request.source_key) {
            return Err(AuthError::SourceBlocked(request.source_key.clone()));
        }
        if !self.allowed_types.is_empty() && !self.allowed_types.contains(&request.request_type) {
            return Err(AuthError::RequestTypeNotAllowed(
                request.request_type.clone(),
            ));
        }

        let key = request
            .request_data
            .get(CREDENTIAL_FIELD)
            .and_then(serde_json::Value::as_str)
            .ok_or(AuthError::MissingApiKey)?;
        if self.key_matches(key) {
            Ok(())
        } else {
            Err(AuthError::InvalidApiKey)
        }
    }

    fn key_matches(&self, raw_key: &str) -> bool {
        let presented = hash_api_key(raw_key);
        // Compare against every hash so timing does not reveal which matched.
        self.key_hashes.iter().fold(false, |found, hash| {
            let eq: bool = hash.as_bytes().ct_eq(presented.as_bytes()).into();
            found | eq
        })
    }
}
