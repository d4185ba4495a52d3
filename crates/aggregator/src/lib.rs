//! Funding-rate aggregation
//!
//! - Concurrent fan-out over every exchange connector
//! - Partial failures logged and excluded, never fatal
//! - In-memory cache of the latest snapshot set and per-symbol history
//! - Periodic ingest scheduler

pub mod scheduler;
pub mod service;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use scheduler::IngestScheduler;
pub use service::FundingService;
pub use store::{FundingStore, StoreStats};
