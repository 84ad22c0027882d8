//! Per-request admission checks run on every claimed row before dispatch:
//! authentication, sliding-window rate limiting, and payload validation, in
//! that order.

pub mod auth;
pub mod clock;
pub mod gate;
pub mod ratelimit;
pub mod validate;

pub use auth::{AuthConfig, AuthError, AuthGate, AuthMode, CREDENTIAL_FIELD, hash_api_key};
pub use clock::{Clock, ManualClock, SystemClock};
pub use gate::{Gate, GateConfig, GateRejection};
pub use ratelimit::{RateLimitConfig, RateLimitError, RateLimiter};
pub use validate::{ValidationConfig, ValidationError, Validator};
