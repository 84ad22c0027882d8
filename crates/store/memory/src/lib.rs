//! In-memory [`QueueStore`](relay_store::QueueStore) backend.
//!
//! Suitable for tests and single-process development. A single mutex guards
//! the whole queue, which makes every claim trivially exclusive.

pub mod store;

pub use store::MemoryQueueStore;
