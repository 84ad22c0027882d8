//! The relay worker: claims batches of pending requests, runs each through
//! the gate and the dispatcher, and records the outcome. A sweeper reaps
//! rows that expired before anyone claimed them, and [`RelayService`] ties
//! both to one shutdown token.

pub mod config;
pub mod lifecycle;
pub mod poller;
pub mod processor;
pub mod service;
pub mod stats;
pub mod sweeper;

pub use config::WorkerConfig;
pub use lifecycle::LifecycleState;
pub use poller::Poller;
pub use processor::Processor;
pub use service::{RelayService, ServiceError};
pub use stats::{StatsSnapshot, WorkerStats, log_report, run_reporter};
pub use sweeper::{SweepReport, Sweeper};
