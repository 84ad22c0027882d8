use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use relay_core::Request;

/// `[validation]` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Ceiling on the serialized size of `request_data`.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Top-level fields `request_data` must carry, keyed by request type.
    #[serde(default)]
    pub required_fields: HashMap<String, Vec<String>>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            required_fields: HashMap::new(),
        }
    }
}

fn default_max_payload_bytes() -> usize {
    64 * 1024
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown request type: {0}")]
    UnknownRequestType(String),

    #[error("payload too large: {size} bytes exceeds {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("missing required field '{field}' for {request_type}")]
    MissingField { request_type: String, field: String },

    #[error("invalid payload: {0}")]
    Malformed(String),
}

/// Last stage of the gate: structural checks on a request.
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
    known_types: HashSet<String>,
}

impl Validator {
    /// `known_types` is the set of request types a route exists for.
    pub fn new(config: ValidationConfig, known_types: impl IntoIterator<Item = String>) -> Self {
        Self {
            config,
            known_types: known_types.into_iter().collect(),
        }
    }

    pub fn validate(&self, request: &Request) -> Result<(), ValidationError> {
        if !self.known_types.contains(&request.request_type) {
            return Err(ValidationError::UnknownRequestType(
                request.request_type.clone(),
            ));
        }

        let size = serde_json::to_vec(&request.request_data)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?
            .len();
        if size > self.config.max_payload_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size,
                max: self.config.max_payload_bytes,
            });
        }

        if let Some(fields) = self.config.required_fields.get(&request.request_type)
            && let Some(field) = fields.iter().find(|f| {
                request
                    .request_data
                    .get(f.as_str())
                    .is_none_or(serde_json::Value::is_null)
            })
        {
            return Err(ValidationError::MissingField {
                request_type: request.request_type.clone(),
                field: field.clone(),
            });
        }
        Ok(())
    }
}
