//! Exchange connectors for perpetual-futures funding rates
//!
//! Features:
//! - One adapter per exchange behind the [`FundingConnector`] contract
//! - Pluggable HTTP transport (reqwest in production)
//! - Bounded 429 retries with a per-adapter cooldown window
//! - TTL-cached contract/market metadata with stale fallback

pub mod aster;
pub mod connector;
pub mod edgex;
pub mod http;
pub mod hyperliquid;
pub mod lighter;
pub mod paradex;
pub mod retry;
pub mod state;
pub mod symbols;

#[cfg(test)]
pub(crate) mod testing;

pub use connector::{build_connector, default_connectors, ExchangeKind, FundingConnector};
pub use http::{HttpMethod, HttpRequest, HttpTransport, ReqwestTransport};
pub use retry::RetryPolicy;
