use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use relay_core::Request;

use crate::auth::{AuthConfig, AuthError, AuthGate, CREDENTIAL_FIELD};
use crate::clock::Clock;
use crate::ratelimit::{RateLimitConfig, RateLimitError, RateLimiter};
use crate::validate::{ValidationConfig, ValidationError, Validator};

/// Configuration for all three gate stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Why the gate refused a request. The message names the failing check and
/// becomes the row's `error_message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateRejection {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl GateRejection {
    /// Stage that rejected the request, as recorded in the audit entry.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::RateLimit(_) => "rate_limit",
            Self::Validation(_) => "validate",
        }
    }
}

/// Auth, then rate limit, then validate. The first failure wins.
pub struct Gate {
    auth: AuthGate,
    limiter: Arc<RateLimiter>,
    validator: Validator,
}

impl Gate {
    pub fn new(auth: AuthGate, limiter: Arc<RateLimiter>, validator: Validator) -> Self {
        Self {
            auth,
            limiter,
            validator,
        }
    }

    /// Build every stage from configuration. `known_types` are the request
    /// types the dispatcher has routes for.
    pub fn from_config(
        config: &GateConfig,
        known_types: impl IntoIterator<Item = String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            AuthGate::new(&config.auth),
            Arc::new(RateLimiter::with_clock(config.rate_limit.clone(), clock)),
            Validator::new(config.validation.clone(), known_types),
        )
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Run every stage against `request`. On success returns the request
    /// with its credential removed from `request_data`, ready to dispatch.
    ///
    /// The credential is stripped before validation, so it never counts
    /// toward the payload ceiling.
    pub fn admit(&self, mut request: Request) -> Result<Request, GateRejection> {
        self.auth.check(&request)?;
        self.limiter.check(&request.source_key)?;

        if let Some(body) = request.request_data.as_object_mut() {
            body.remove(CREDENTIAL_FIELD);
        }
        self.validator.validate(&request)?;

        debug!(request_id = %request.id, "request admitted");
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use relay_core::{NewRequest, RequestId};

    use crate::auth::{AuthMode, hash_api_key};
    use crate::clock::ManualClock;

    use super::*;

    fn gate(per_source_max: u64) -> Gate {
        let config = GateConfig {
            auth: AuthConfig {
                mode: AuthMode::ApiKey,
                api_key_hashes: vec![hash_api_key("k1")],
                allowed_request_types: vec![],
                blocked_sources: vec!["Bandit_07".into()],
            },
            rate_limit: RateLimitConfig {
                enabled: true,
                global_max: 100,
                per_source_max,
                window_seconds: 60,
            },
            validation: ValidationConfig::default(),
        };
        Gate::from_config(
            &config,
            ["dialogue".to_owned()],
            Arc::new(ManualClock::default()),
        )
    }

    fn request(request_type: &str, source: &str, data: serde_json::Value) -> Request {
        NewRequest::new(request_type, "/npc/dialogue", source, data)
            .into_request(RequestId::new(3), Utc::now())
    }

    #[test]
    fn admitted_request_has_credential_stripped() {
        let g = gate(5);
        let admitted = g
            .admit(request("dialogue", "Guard_01", json!({"api_key": "k1", "text": "hi"})))
            .unwrap();
        assert!(admitted.request_data.get("api_key").is_none());
        assert_eq!(admitted.request_data["text"], "hi");
    }

    #[test]
    fn auth_runs_before_rate_limit() {
        let g = gate(5);
        let err = g
            .admit(request("dialogue", "Guard_01", json!({"api_key": "bad"})))
            .unwrap_err();
        assert_eq!(err.stage(), "auth");
        assert_eq!(err.to_string(), "invalid api key");
        // The rejected request never reached the limiter.
        assert_eq!(g.limiter().source_count("Guard_01"), 0);
    }

    #[test]
    fn rate_limit_rejection_names_stage() {
        let g = gate(1);
        let ok = json!({"api_key": "k1"});
        g.admit(request("dialogue", "Guard_01", ok.clone())).unwrap();
        let err = g.admit(request("dialogue", "Guard_01", ok)).unwrap_err();
        assert_eq!(err.stage(), "rate_limit");
        assert!(err.to_string().starts_with("rate limit exceeded"));
    }

    #[test]
    fn unknown_type_rejected_at_validate() {
        let g = gate(5);
        let err = g
            .admit(request("teleport", "Guard_01", json!({"api_key": "k1"})))
            .unwrap_err();
        assert_eq!(err.stage(), "validate");
        assert_eq!(err.to_string(), "unknown request type: teleport");
    }

    #[test]
    fn credential_does_not_count_toward_payload_ceiling() {
        let body = json!({"text": "hi"});
        let ceiling = serde_json::to_vec(&body).unwrap().len();
        let config = GateConfig {
            auth: AuthConfig {
                mode: AuthMode::ApiKey,
                api_key_hashes: vec![hash_api_key("k1")],
                ..AuthConfig::default()
            },
            validation: ValidationConfig {
                max_payload_bytes: ceiling,
                ..ValidationConfig::default()
            },
            ..GateConfig::default()
        };
        let g = Gate::from_config(
            &config,
            ["dialogue".to_owned()],
            Arc::new(ManualClock::default()),
        );

        let admitted = g
            .admit(request("dialogue", "Guard_01", json!({"api_key": "k1", "text": "hi"})))
            .unwrap();
        assert_eq!(admitted.request_data, body);

        let err = g
            .admit(request("dialogue", "Guard_01", json!({"api_key": "k1", "text": "hello"})))
            .unwrap_err();
        assert_eq!(err.stage(), "validate");
    }

    #[test]
    fn blocked_source_with_valid_key() {
        let g = gate(5);
        let err = g
            .admit(request("dialogue", "Bandit_07", json!({"api_key": "k1"})))
            .unwrap_err();
        assert!(matches!(err, GateRejection::Auth(AuthError::SourceBlocked(_))));
    }
}
