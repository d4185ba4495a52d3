//! Aster futures adapter
//!
//! Binance-style REST API. Latest funding comes from `premiumIndex`, the
//! per-symbol funding interval from `fundingInfo` (cached), and history from
//! `fundingRate`, paged forward by time with both bounds inclusive.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use funding_core::{
    build_history_point, build_snapshot, fraction_to_pct, parse_number, to_canonical_timestamp, ConnectorError,
    ConnectorOptions, ConnectorResult, FundingHistoryPoint, FundingSnapshot, HistoryParams, HistoryPointParams,
    NumberLike, SnapshotParams, DEFAULT_PERIOD_HOURS,
};

use crate::connector::FundingConnector;
use crate::http::{endpoint, HttpRequest, HttpTransport};
use crate::retry::{send_with_retry, RetryPolicy};
use crate::state::{history_request_key, SharedState, METADATA_TTL};
use crate::symbols::{alnum_upper, strip_quote};

pub const DEFAULT_BASE_URL: &str = "https://fapi.asterdex.com";

const EXCHANGE: &str = "Aster";
const HISTORY_PAGE_LIMIT: usize = 1000;
/// Inferred intervals shorter than this are ignored
const MIN_INFERRED_HOURS: f64 = 0.5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndexRecord {
    symbol: String,
    mark_price: Option<NumberLike>,
    last_funding_rate: Option<NumberLike>,
    next_funding_time: Option<NumberLike>,
    time: Option<NumberLike>,
}

/// `premiumIndex` returns an array, or a single object when queried by symbol
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PremiumIndexPayload {
    Many(Vec<PremiumIndexRecord>),
    One(PremiumIndexRecord),
}

impl PremiumIndexPayload {
    fn into_records(self) -> Vec<PremiumIndexRecord> {
        match self {
            PremiumIndexPayload::Many(records) => records,
            PremiumIndexPayload::One(record) => vec![record],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingInfoRecord {
    symbol: String,
    funding_interval_hours: Option<NumberLike>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingRateRecord {
    symbol: Option<String>,
    funding_rate: Option<NumberLike>,
    funding_time: Option<NumberLike>,
}

/// Funding interval in hours per symbol
type IntervalMap = Arc<HashMap<String, f64>>;

pub struct AsterConnector {
    base_url: String,
    api_key: Option<String>,
    symbols: Vec<String>,
    max_symbols: usize,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    state: SharedState<IntervalMap>,
}

impl AsterConnector {
    pub fn new(options: ConnectorOptions, transport: Arc<dyn HttpTransport>) -> Self {
        let policy = RetryPolicy::default();
        Self {
            base_url: options.base_url_or(DEFAULT_BASE_URL).to_string(),
            symbols: options.symbols.iter().map(|s| resolve_symbol(s)).collect(),
            max_symbols: options.instrument_cap(usize::MAX),
            api_key: options.api_key,
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

    fn request(&self, path: &str) -> ConnectorResult<HttpRequest> {
        let request = HttpRequest::get(endpoint(&self.base_url, path)?);
        Ok(match &self.api_key {
            Some(key) => request.header("X-MBX-APIKEY", key.as_str()),
            None => request,
        })
    }

    async fn send(&self, request: &HttpRequest) -> ConnectorResult<Value> {
        send_with_retry(self.transport.as_ref(), request, &self.policy)
            .await
            .map_err(|e| {
                warn!("Aster {} error: {}", request.path(), e);
                e
            })
    }

    /// Funding intervals from `fundingInfo`; missing on failure is not fatal
    async fn interval_hours(&self) -> IntervalMap {
        if let Some(cached) = self.state.fresh_metadata() {
            return cached;
        }

        match self.fetch_funding_info().await {
            Ok(intervals) => {
                self.state.store_metadata(intervals.clone());
                intervals
            }
            Err(e) => {
                debug!("Aster fundingInfo unavailable: {}", e);
                self.state.stale_metadata().unwrap_or_default()
            }
        }
    }

    async fn fetch_funding_info(&self) -> ConnectorResult<IntervalMap> {
        let value = self.send(&self.request("/fapi/v1/fundingInfo")?).await?;
        let records: Vec<FundingInfoRecord> = serde_json::from_value(value)?;

        let intervals = records
            .into_iter()
            .filter_map(|r| {
                let hours = parse_number(r.funding_interval_hours.as_ref()).filter(|h| *h > 0.0)?;
                Some((r.symbol, hours))
            })
            .collect();
        Ok(Arc::new(intervals))
    }

    async fn load_latest(&self) -> ConnectorResult<Vec<FundingSnapshot>> {
        let value = self.send(&self.request("/fapi/v1/premiumIndex")?).await?;
        let records = serde_json::from_value::<PremiumIndexPayload>(value)?.into_records();

        if records.is_empty() {
            return Err(ConnectorError::EmptyResponse("Aster premium index response empty".to_string()));
        }

        let intervals = self.interval_hours().await;

        let snapshots: Vec<FundingSnapshot> = records
            .into_iter()
            .filter(|r| self.symbols.is_empty() || self.symbols.contains(&r.symbol))
            .take(self.max_symbols)
            .map(|record| {
                let period_hours = intervals
                    .get(&record.symbol)
                    .copied()
                    .or_else(|| infer_interval_hours(&record))
                    .unwrap_or(DEFAULT_PERIOD_HOURS);

                build_snapshot(
                    SnapshotParams::new(
                        record.symbol.as_str(),
                        EXCHANGE,
                        fraction_to_pct(parse_number(record.last_funding_rate.as_ref())),
                        period_hours,
                    )
                    .mark_price(parse_number(record.mark_price.as_ref()))
                    .collected_at(record.time.as_ref())
                    .next_funding_at(record.next_funding_time.as_ref()),
                )
            })
            .collect();

        if snapshots.is_empty() {
            return Err(ConnectorError::EmptyResponse(
                "Aster premium index has no configured symbols".to_string(),
            ));
        }
        Ok(snapshots)
    }

    async fn load_history(&self, symbol: &str, params: &HistoryParams) -> ConnectorResult<Vec<FundingHistoryPoint>> {
        let resolved = resolve_symbol(symbol);
        let end = params.to_ms();
        let mut start = params.from_ms();
        let mut points = Vec::new();

        loop {
            let request = self
                .request("/fapi/v1/fundingRate")?
                .query("symbol", &resolved)
                .query("startTime", start.to_string())
                .query("endTime", end.to_string())
                .query("limit", HISTORY_PAGE_LIMIT.to_string());

            let records: Vec<FundingRateRecord> = serde_json::from_value(self.send(&request).await?)?;
            let page_len = records.len();
            let mut last_time = None;

            for record in records {
                let bucket_start = to_canonical_timestamp(record.funding_time.as_ref());
                last_time = bucket_start.map(|t| t.timestamp_millis()).or(last_time);

                points.push(build_history_point(
                    HistoryPointParams::new(
                        record.symbol.unwrap_or_else(|| resolved.clone()),
                        EXCHANGE,
                        bucket_start,
                        params.granularity_hours,
                        fraction_to_pct(parse_number(record.funding_rate.as_ref())),
                    )
                    .source_count(1),
                ));
            }

            // a full page that does not move the cursor forward ends paging
            match last_time.map(|last| last + 1) {
                Some(next) if page_len >= HISTORY_PAGE_LIMIT && next > start && next <= end => {
                    start = next;
                    self.policy.pace().await;
                }
                _ => break,
            }
        }

        if points.is_empty() {
            return Err(ConnectorError::EmptyResponse(format!("Aster funding history empty for {}", symbol)));
        }
        Ok(points)
    }
}

#[async_trait]
impl FundingConnector for AsterConnector {
    fn name(&self) -> &str {
        EXCHANGE
    }

    async fn fetch_latest(&self) -> ConnectorResult<Vec<FundingSnapshot>> {
        self.state.guard_latest(self.load_latest()).await
    }

    async fn fetch_history(&self, symbol: &str, params: &HistoryParams) -> ConnectorResult<Vec<FundingHistoryPoint>> {
        let key = history_request_key(&resolve_symbol(symbol), params);
        self.state.guard_history(&key, self.load_history(symbol, params)).await
    }
}

/// `BTC`, `btc-usd`, `BTCUSDT` all map to `BTCUSDT`
fn resolve_symbol(symbol: &str) -> String {
    let clean = alnum_upper(symbol);
    if clean.ends_with("USDT") {
        return clean;
    }
    format!("{}USDT", strip_quote(&clean))
}

/// Gap between the current and next funding time, when at least half an hour
fn infer_interval_hours(record: &PremiumIndexRecord) -> Option<f64> {
    let next = parse_number(record.next_funding_time.as_ref())?;
    let now = parse_number(record.time.as_ref())?;
    let hours = (next - now) / 3_600_000.0;
    (hours.is_finite() && hours >= MIN_INFERRED_HOURS).then(|| (hours * 100.0).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, ScriptedTransport};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn premium_index() -> Value {
        json!([
            {
                "symbol": "BTCUSDT",
                "markPrice": "43210.1234",
                "indexPrice": "43200.0",
                "lastFundingRate": "0.00025",
                "nextFundingTime": 1700014400000u64,
                "time": 1700000000000u64
            },
            {
                "symbol": "ETHUSDT",
                "markPrice": "2250.5",
                "lastFundingRate": "-0.0001",
                "nextFundingTime": 1700028800000u64,
                "time": 1700000000000u64
            }
        ])
    }

    fn connector(transport: Arc<ScriptedTransport>, options: ConnectorOptions) -> AsterConnector {
        AsterConnector::new(options, transport).with_policy(RetryPolicy::immediate())
    }

    fn options() -> ConnectorOptions {
        ConnectorOptions {
            base_url: Some("https://api.example.com".to_string()),
            api_key: Some("test-key".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_latest_snapshots() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .json("/fapi/v1/premiumIndex", premium_index())
                .json(
                    "/fapi/v1/fundingInfo",
                    json!([{ "symbol": "BTCUSDT", "fundingIntervalHours": 4 }]),
                ),
        );
        let aster = connector(transport.clone(), options());

        let snapshots = aster.fetch_latest().await.unwrap();

        assert_eq!(snapshots.len(), 2);
        let btc = &snapshots[0];
        assert_eq!(btc.symbol, "BTCUSDT");
        assert_eq!(btc.exchange, "Aster");
        assert!((btc.funding_rate_pct - 0.025).abs() < 1e-12);
        assert_eq!(btc.period_hours, 4.0);
        assert_eq!(btc.mark_price, Some(43210.1234));
        assert_eq!(btc.collected_at, Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());

        // Not in fundingInfo: inferred from the next funding time
        assert_eq!(snapshots[1].period_hours, 8.0);

        let requests = transport.requests();
        assert_eq!(requests[0].url.as_str(), "https://api.example.com/fapi/v1/premiumIndex");
        assert!(requests
            .iter()
            .all(|r| r.headers.contains(&("X-MBX-APIKEY".to_string(), "test-key".to_string()))));
    }

    #[tokio::test]
    async fn test_funding_info_failure_falls_back_to_inference() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .json("/fapi/v1/premiumIndex", premium_index())
                .route("/fapi/v1/fundingInfo", vec![Scripted::Status(500)]),
        );
        let aster = connector(transport, options());

        let snapshots = aster.fetch_latest().await.unwrap();
        assert_eq!(snapshots[0].period_hours, 4.0);
        assert_eq!(snapshots[1].period_hours, 8.0);
    }

    #[tokio::test]
    async fn test_symbol_allow_list() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .json("/fapi/v1/premiumIndex", premium_index())
                .json("/fapi/v1/fundingInfo", json!([])),
        );
        let aster = connector(
            transport,
            ConnectorOptions {
                symbols: vec!["eth".to_string()],
                ..options()
            },
        );

        let snapshots = aster.fetch_latest().await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].symbol, "ETHUSDT");
    }

    #[tokio::test]
    async fn test_empty_premium_index_is_error() {
        let transport = Arc::new(ScriptedTransport::new().json("/fapi/v1/premiumIndex", json!([])));
        let aster = connector(transport, options());

        let err = aster.fetch_latest().await.unwrap_err();
        assert_eq!(err.to_string(), "Aster premium index response empty");
    }

    #[tokio::test]
    async fn test_history() {
        let transport = Arc::new(ScriptedTransport::new().json(
            "/fapi/v1/fundingRate",
            json!([
                { "symbol": "BTCUSDT", "fundingRate": "0.0003", "fundingTime": 1700000000000u64 },
                { "symbol": "BTCUSDT", "fundingRate": "0.0001", "fundingTime": 1700003600000u64 }
            ]),
        ));
        let aster = connector(transport.clone(), options());
        let params = HistoryParams {
            from: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            to: Utc.timestamp_millis_opt(1_700_007_200_000).unwrap(),
            granularity_hours: 1.0,
        };

        let history = aster.fetch_history("BTC", &params).await.unwrap();

        assert_eq!(
            transport.urls(),
            vec!["https://api.example.com/fapi/v1/fundingRate?symbol=BTCUSDT&startTime=1700000000000&endTime=1700007200000&limit=1000"]
        );
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].symbol, "BTCUSDT");
        assert_eq!(history[0].avg_funding_rate_pct, 0.03);
        assert_eq!(history[0].bucket_duration_hours, 1.0);
        assert_eq!(history[1].source_count, 1);
    }

    #[tokio::test]
    async fn test_history_stops_when_page_does_not_advance() {
        let stuck_page: Vec<Value> = (0..HISTORY_PAGE_LIMIT)
            .map(|_| json!({ "symbol": "BTCUSDT", "fundingRate": "0.0001", "fundingTime": 1700000000000u64 }))
            .collect();
        let transport = Arc::new(ScriptedTransport::new().json("/fapi/v1/fundingRate", Value::Array(stuck_page)));
        let aster = connector(transport.clone(), options());
        let params = HistoryParams {
            from: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            to: Utc.timestamp_millis_opt(1_700_086_400_000).unwrap(),
            granularity_hours: 8.0,
        };

        let history = aster.fetch_history("BTC", &params).await.unwrap();

        assert_eq!(transport.calls("/fapi/v1/fundingRate"), 2);
        assert_eq!(history.len(), 2 * HISTORY_PAGE_LIMIT);
    }

    #[tokio::test]
    async fn test_rolling_window_reuses_last_good_history() {
        let transport = Arc::new(ScriptedTransport::new().json(
            "/fapi/v1/fundingRate",
            json!([{ "symbol": "BTCUSDT", "fundingRate": "0.0003", "fundingTime": 1700000000000u64 }]),
        ));
        let aster = connector(transport.clone(), options());
        let base = Utc.timestamp_millis_opt(1_700_086_400_000).unwrap();

        let first = aster
            .fetch_history("BTC", &HistoryParams::lookback(base, 24, 1.0))
            .await
            .unwrap();

        transport.set("/fapi/v1/fundingRate", vec![Scripted::Json(json!([]))]);
        for minutes in 1..5 {
            let later = HistoryParams::lookback(base + chrono::Duration::minutes(minutes), 24, 1.0);
            assert_eq!(aster.fetch_history("BTC", &later).await.unwrap(), first);
        }
        assert_eq!(aster.state.history_slots(), 1);

        let coarser = HistoryParams::lookback(base, 24, 4.0);
        let err = tokio_test::assert_err!(aster.fetch_history("BTC", &coarser).await);
        assert!(matches!(err, ConnectorError::EmptyResponse(_)));
    }

    #[test]
    fn test_resolve_symbol() {
        assert_eq!(resolve_symbol("BTC"), "BTCUSDT");
        assert_eq!(resolve_symbol("btcusdt"), "BTCUSDT");
        assert_eq!(resolve_symbol("ETH-USD"), "ETHUSDT");
        assert_eq!(resolve_symbol("1000PEPE"), "1000PEPEUSDT");
    }

    #[test]
    fn test_infer_interval() {
        let record = |next: u64| PremiumIndexRecord {
            symbol: "BTCUSDT".to_string(),
            mark_price: None,
            last_funding_rate: None,
            next_funding_time: Some(NumberLike::Number(next as f64)),
            time: Some(NumberLike::Number(1_700_000_000_000.0)),
        };

        assert_eq!(infer_interval_hours(&record(1_700_014_400_000)), Some(4.0));
        assert_eq!(infer_interval_hours(&record(1_700_000_600_000)), None);
        assert_eq!(infer_interval_hours(&record(1_699_990_000_000)), None);
    }
}
