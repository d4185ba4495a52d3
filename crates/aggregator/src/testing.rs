//! In-memory connectors for service and scheduler tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use funding_connectors::FundingConnector;
use funding_core::{
    build_history_point, build_snapshot, ConnectorError, ConnectorResult, FundingHistoryPoint, FundingSnapshot,
    HistoryParams, HistoryPointParams, SnapshotParams,
};

pub fn snapshot(exchange: &str, symbol: &str) -> FundingSnapshot {
    build_snapshot(SnapshotParams::new(symbol, exchange, 0.01, 8.0).collected_at(Utc::now()))
}

pub fn point(symbol: &str, rate_pct: f64) -> FundingHistoryPoint {
    build_history_point(HistoryPointParams::new(symbol, "Stub", Utc::now(), 1.0, rate_pct).source_count(1))
}

/// Connector that answers every call the same way and counts calls
pub struct StubConnector {
    name: String,
    fail: bool,
    symbols: Vec<String>,
    period_hours: f64,
    latest_calls: AtomicUsize,
    history_calls: AtomicUsize,
}

impl StubConnector {
    pub fn ok(name: &str, symbols: &[&str]) -> Arc<Self> {
        Arc::new(Self::build(name, false, symbols, 8.0))
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, true, &[], 8.0))
    }

    pub fn with_period(name: &str, symbols: &[&str], period_hours: f64) -> Arc<Self> {
        Arc::new(Self::build(name, false, symbols, period_hours))
    }

    fn build(name: &str, fail: bool, symbols: &[&str], period_hours: f64) -> Self {
        Self {
            name: name.to_string(),
            fail,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            period_hours,
            latest_calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
        }
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    fn failure(&self) -> ConnectorError {
        ConnectorError::Http {
            status: 500,
            url: format!("https://{}.test/funding", self.name.to_lowercase()),
            message: "upstream down".to_string(),
        }
    }
}

#[async_trait]
impl FundingConnector for StubConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_latest(&self) -> ConnectorResult<Vec<FundingSnapshot>> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(self.failure());
        }
        Ok(self
            .symbols
            .iter()
            .map(|symbol| {
                build_snapshot(
                    SnapshotParams::new(symbol.as_str(), self.name.as_str(), 0.01, self.period_hours)
                        .collected_at(Utc::now()),
                )
            })
            .collect())
    }

    async fn fetch_history(&self, symbol: &str, params: &HistoryParams) -> ConnectorResult<Vec<FundingHistoryPoint>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(self.failure());
        }
        Ok(vec![build_history_point(
            HistoryPointParams::new(symbol, self.name.as_str(), params.from, params.granularity_hours, 0.01)
                .source_count(1),
        )])
    }
}

/// Upcast for `FundingService::new`
pub fn as_connectors(stubs: &[Arc<StubConnector>]) -> Vec<Arc<dyn FundingConnector>> {
    stubs.iter().map(|s| s.clone() as Arc<dyn FundingConnector>).collect()
}
