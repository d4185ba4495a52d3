//! Connector contract and factory

use std::sync::Arc;

use async_trait::async_trait;

use funding_core::{ConnectorOptions, ConnectorResult, ConnectorsConfig, FundingHistoryPoint, FundingSnapshot, HistoryParams};

use crate::aster::AsterConnector;
use crate::edgex::EdgeXConnector;
use crate::http::HttpTransport;
use crate::hyperliquid::HyperliquidConnector;
use crate::lighter::LighterConnector;
use crate::paradex::ParadexConnector;

/// One exchange's funding data source
#[async_trait]
pub trait FundingConnector: Send + Sync {
    fn name(&self) -> &str;

    /// Current funding state for every instrument the adapter covers.
    /// Fails when the upstream yields nothing usable.
    async fn fetch_latest(&self) -> ConnectorResult<Vec<FundingSnapshot>>;

    /// Historical funding for one symbol within `params`
    async fn fetch_history(&self, symbol: &str, params: &HistoryParams) -> ConnectorResult<Vec<FundingHistoryPoint>>;
}

/// Supported exchanges, in merge order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    Aster,
    Paradex,
    Lighter,
    Hyperliquid,
    EdgeX,
}

impl ExchangeKind {
    pub const ALL: [ExchangeKind; 5] = [
        ExchangeKind::Aster,
        ExchangeKind::Paradex,
        ExchangeKind::Lighter,
        ExchangeKind::Hyperliquid,
        ExchangeKind::EdgeX,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ExchangeKind::Aster => "Aster",
            ExchangeKind::Paradex => "Paradex",
            ExchangeKind::Lighter => "Lighter",
            ExchangeKind::Hyperliquid => "Hyperliquid",
            ExchangeKind::EdgeX => "EdgeX",
        }
    }
}

pub fn build_connector(
    kind: ExchangeKind,
    options: ConnectorOptions,
    transport: Arc<dyn HttpTransport>,
) -> Arc<dyn FundingConnector> {
    match kind {
        ExchangeKind::Aster => Arc::new(AsterConnector::new(options, transport)),
        ExchangeKind::Paradex => Arc::new(ParadexConnector::new(options, transport)),
        ExchangeKind::Lighter => Arc::new(LighterConnector::new(options, transport)),
        ExchangeKind::Hyperliquid => Arc::new(HyperliquidConnector::new(options, transport)),
        ExchangeKind::EdgeX => Arc::new(EdgeXConnector::new(options, transport)),
    }
}

/// All five connectors sharing one transport
pub fn default_connectors(config: &ConnectorsConfig, transport: Arc<dyn HttpTransport>) -> Vec<Arc<dyn FundingConnector>> {
    ExchangeKind::ALL
        .iter()
        .map(|kind| {
            let options = match kind {
                ExchangeKind::Aster => config.aster.clone(),
                ExchangeKind::Paradex => config.paradex.clone(),
                ExchangeKind::Lighter => config.lighter.clone(),
                ExchangeKind::Hyperliquid => config.hyperliquid.clone(),
                ExchangeKind::EdgeX => config.edgex.clone(),
            };
            build_connector(*kind, options, transport.clone())
        })
        .collect()
}
