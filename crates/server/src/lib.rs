//! HTTP front for the funding-rate aggregator
//!
//! Serves the cached latest snapshots and history buckets kept fresh by the
//! ingest scheduler.

pub mod routes;
pub mod server;

pub use routes::{parse_duration_hours, router};
pub use server::{spawn_signal_listener, HttpServer, HttpServerConfig};
