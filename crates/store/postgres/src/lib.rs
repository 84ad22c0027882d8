//! PostgreSQL [`QueueStore`](relay_store::QueueStore) backend.
//!
//! Rows live in `ai_requests`, `ai_responses` and `ai_request_log`. The
//! batch claim uses `FOR UPDATE SKIP LOCKED`, so any number of worker
//! processes can share one database without coordinating with each other.

pub mod config;
pub mod migrations;
pub mod store;

pub use config::PostgresConfig;
pub use store::PostgresQueueStore;
