//! Queue store abstraction for relay.
//!
//! [`QueueStore`] is the load-bearing seam of the system: a relational
//! table used as a work queue, with a non-blocking batch claim and
//! transactional terminal transitions. Backends live in sibling crates
//! (`relay-store-memory`, `relay-store-postgres`) and prove their behavior
//! with [`testing::run_store_conformance_tests`].

pub mod error;
pub mod store;
pub mod testing;

pub use error::StoreError;
pub use store::{QueueStore, StatusCounts};
