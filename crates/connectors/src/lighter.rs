//! Lighter adapter
//!
//! A single `funding-rates` call lists every market. Lighter also relays
//! other venues' rates through this endpoint, so the exchange label comes
//! from each record.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use funding_core::{
    build_history_point, build_snapshot, fraction_to_pct, parse_number, ConnectorError, ConnectorOptions,
    ConnectorResult, FundingHistoryPoint, FundingSnapshot, HistoryParams, HistoryPointParams, NumberLike,
    SnapshotParams, DEFAULT_PERIOD_HOURS,
};

use crate::connector::FundingConnector;
use crate::http::{endpoint, HttpRequest, HttpTransport};
use crate::retry::{send_with_retry, RetryPolicy};
use crate::state::{SharedState, METADATA_TTL};
use crate::symbols::base_ticker;

pub const DEFAULT_BASE_URL: &str = "https://mainnet.zklighter.elliot.ai";

const EXCHANGE: &str = "Lighter";

#[derive(Debug, Deserialize)]
struct FundingRecord {
    exchange: Option<String>,
    market: Option<String>,
    symbol: Option<String>,
    rate: Option<NumberLike>,
    #[serde(rename = "fundingRate")]
    funding_rate_camel: Option<NumberLike>,
    funding_rate: Option<NumberLike>,
    #[serde(rename = "fundingIntervalHours")]
    interval_hours_camel: Option<NumberLike>,
    funding_interval_hours: Option<NumberLike>,
    timestamp: Option<NumberLike>,
    collected_at: Option<NumberLike>,
}

impl FundingRecord {
    fn rate(&self) -> Option<f64> {
        [&self.rate, &self.funding_rate_camel, &self.funding_rate]
            .into_iter()
            .find_map(|value| value.as_ref())
            .and_then(|value| value.as_f64())
    }

    fn period_hours(&self) -> f64 {
        parse_number(self.interval_hours_camel.as_ref().or(self.funding_interval_hours.as_ref()))
            .filter(|h| *h > 0.0)
            .unwrap_or(DEFAULT_PERIOD_HOURS)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FundingRatesPayload {
    Bare(Vec<FundingRecord>),
    Wrapped {
        #[serde(default)]
        funding_rates: Vec<FundingRecord>,
    },
}

impl FundingRatesPayload {
    fn into_records(self) -> Vec<FundingRecord> {
        match self {
            FundingRatesPayload::Bare(records) => records,
            FundingRatesPayload::Wrapped { funding_rates } => funding_rates,
        }
    }
}

pub struct LighterConnector {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    state: SharedState<()>,
}

impl LighterConnector {
    pub fn new(options: ConnectorOptions, transport: Arc<dyn HttpTransport>) -> Self {
        let policy = RetryPolicy::default();
        Self {
            base_url: options.base_url_or(DEFAULT_BASE_URL).to_string(),
            transport,
            policy,
            state: SharedState::new(EXCHANGE, METADATA_TTL, policy.cooldown),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.state.set_cooldown(policy.cooldown);
        self.policy = policy;
        self
    }

    async fn load_latest(&self) -> ConnectorResult<Vec<FundingSnapshot>> {
        let request = HttpRequest::get(endpoint(&self.base_url, "/api/v1/funding-rates")?);
        let value = send_with_retry(self.transport.as_ref(), &request, &self.policy)
            .await
            .map_err(|e| {
                warn!("Lighter funding-rates error: {}", e);
                e
            })?;
        let records = serde_json::from_value::<FundingRatesPayload>(value)?.into_records();

        if records.is_empty() {
            return Err(ConnectorError::EmptyResponse("Lighter funding rates response empty".to_string()));
        }

        let snapshots: Vec<FundingSnapshot> = records
            .into_iter()
            .filter_map(|record| {
                let Some(symbol) = record.market.clone().or_else(|| record.symbol.clone()) else {
                    warn!("Lighter record missing market or symbol field");
                    return None;
                };
                let exchange = record.exchange.as_deref().unwrap_or("lighter").to_lowercase();

                Some(build_snapshot(
                    SnapshotParams::new(symbol, exchange, fraction_to_pct(record.rate()), record.period_hours())
                        .collected_at(record.timestamp.as_ref().or(record.collected_at.as_ref())),
                ))
            })
            .collect();

        if snapshots.is_empty() {
            return Err(ConnectorError::EmptyResponse("Lighter funding rates have no usable records".to_string()));
        }
        Ok(snapshots)
    }
}

#[async_trait]
impl FundingConnector for LighterConnector {
    fn name(&self) -> &str {
        EXCHANGE
    }

    async fn fetch_latest(&self) -> ConnectorResult<Vec<FundingSnapshot>> {
        self.state.guard_latest(self.load_latest()).await
    }

    /// Lighter exposes no funding history endpoint. This returns one point per
    /// matching latest snapshot, bucketed at the snapshot's collection time,
    /// and ignores the requested window.
    async fn fetch_history(&self, symbol: &str, params: &HistoryParams) -> ConnectorResult<Vec<FundingHistoryPoint>> {
        let target = base_ticker(symbol);
        let points: Vec<FundingHistoryPoint> = self
            .fetch_latest()
            .await?
            .into_iter()
            .filter(|snapshot| base_ticker(&snapshot.symbol) == target)
            .map(|snapshot| {
                build_history_point(
                    HistoryPointParams::new(
                        snapshot.symbol,
                        snapshot.exchange,
                        snapshot.collected_at,
                        params.granularity_hours,
                        snapshot.funding_rate_pct,
                    )
                    .source_count(1),
                )
            })
            .collect();

        if points.is_empty() {
            return Err(ConnectorError::EmptyResponse(format!("Lighter history unavailable for {}", symbol)));
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const PATH: &str = "/api/v1/funding-rates";

    fn connector(transport: Arc<ScriptedTransport>) -> LighterConnector {
        LighterConnector::new(ConnectorOptions::with_base_url("https://api.example.com"), transport)
            .with_policy(RetryPolicy::immediate())
    }

    #[tokio::test]
    async fn test_wrapped_payload() {
        let transport = Arc::new(ScriptedTransport::new().json(
            PATH,
            json!({
                "code": 200,
                "funding_rates": [
                    { "market_id": 1, "exchange": "Lighter", "symbol": "BTC", "rate": 0.0001, "timestamp": 1700000000 },
                    { "market_id": 1, "exchange": "binance", "symbol": "BTC", "rate": "-0.00005" },
                    { "market_id": 2, "exchange": "lighter", "symbol": "ETH", "rate": 0.0002, "funding_interval_hours": 1 }
                ]
            }),
        ));
        let lighter = connector(transport.clone());

        let snapshots = lighter.fetch_latest().await.unwrap();

        assert_eq!(transport.urls(), vec!["https://api.example.com/api/v1/funding-rates"]);
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].symbol, "BTC");
        assert_eq!(snapshots[0].exchange, "lighter");
        assert!((snapshots[0].funding_rate_pct - 0.01).abs() < 1e-12);
        assert_eq!(snapshots[0].period_hours, 8.0);
        assert_eq!(snapshots[0].collected_at, Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());
        assert_eq!(snapshots[1].exchange, "binance");
        assert_eq!(snapshots[2].period_hours, 1.0);
    }

    #[tokio::test]
    async fn test_base_url_path_prefix_is_kept() {
        let transport = Arc::new(ScriptedTransport::new().json(
            "/lighter/api/v1/funding-rates",
            json!([{ "symbol": "BTC", "rate": 0.0001 }]),
        ));
        let lighter = LighterConnector::new(
            ConnectorOptions::with_base_url("https://proxy.example.com/lighter/"),
            transport.clone(),
        )
        .with_policy(RetryPolicy::immediate());

        assert_eq!(lighter.fetch_latest().await.unwrap().len(), 1);
        assert_eq!(transport.urls(), vec!["https://proxy.example.com/lighter/api/v1/funding-rates"]);
    }

    #[tokio::test]
    async fn test_bare_payload_and_missing_symbol() {
        let transport = Arc::new(ScriptedTransport::new().json(
            PATH,
            json!([
                { "market": "SOL-PERP", "fundingRate": "0.0003" },
                { "funding_rate": 0.0001 }
            ]),
        ));
        let lighter = connector(transport);

        let snapshots = lighter.fetch_latest().await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].symbol, "SOL-PERP");
        assert!((snapshots[0].funding_rate_pct - 0.03).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_empty_response_is_error() {
        let transport = Arc::new(ScriptedTransport::new().json(PATH, json!({ "code": 200, "funding_rates": [] })));
        let err = connector(transport).fetch_latest().await.unwrap_err();
        assert_eq!(err.to_string(), "Lighter funding rates response empty");
    }

    #[tokio::test]
    async fn test_history_synthesized_from_latest() {
        let transport = Arc::new(ScriptedTransport::new().json(
            PATH,
            json!([
                { "exchange": "lighter", "symbol": "BTC", "rate": 0.0001, "timestamp": 1700000000000u64 },
                { "exchange": "lighter", "symbol": "ETH", "rate": 0.0002 }
            ]),
        ));
        let lighter = connector(transport);
        let params = HistoryParams::lookback(Utc::now(), 24, 1.0);

        let history = lighter.fetch_history("BTC-USD-PERP", &params).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].symbol, "BTC");
        assert_eq!(history[0].avg_funding_rate_pct, 0.01);
        assert_eq!(history[0].bucket_duration_hours, 1.0);
        assert_eq!(history[0].source_count, 1);

        let err = lighter.fetch_history("DOGE", &params).await.unwrap_err();
        assert_eq!(err.to_string(), "Lighter history unavailable for DOGE");
    }
}
