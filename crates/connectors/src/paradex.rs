//! Paradex adapter
//!
//! Markets come from `/v1/markets` (perpetuals quoted in USD only). Latest
//! funding is one `funding/data?page_size=1` call per market, sequentially;
//! history pages through `funding/data` with the `next` cursor, both time
//! bounds inclusive.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use funding_core::{
    build_history_point, build_snapshot, fraction_to_pct, parse_number, ConnectorError, ConnectorOptions,
    ConnectorResult, FundingHistoryPoint, FundingSnapshot, HistoryParams, HistoryPointParams, NumberLike,
    SnapshotParams, DEFAULT_PERIOD_HOURS,
};

use crate::connector::FundingConnector;
use crate::http::{endpoint, HttpRequest, HttpTransport};
use crate::retry::{send_with_retry, RetryPolicy};
use crate::state::{history_request_key, SharedState, METADATA_TTL};
use crate::symbols::{alnum_upper, base_ticker};

pub const DEFAULT_BASE_URL: &str = "https://api.prod.paradex.trade";
pub const DEFAULT_MARKETS: [&str; 3] = ["BTC-USD-PERP", "ETH-USD-PERP", "SOL-USD-PERP"];
pub const DEFAULT_MAX_MARKETS: usize = 300;

const EXCHANGE: &str = "Paradex";
const MARKET_SUFFIX: &str = "-USD-PERP";
const HISTORY_PAGE_SIZE: u32 = 500;

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    #[serde(default)]
    results: Vec<MarketRecord>,
}

#[derive(Debug, Deserialize)]
struct MarketRecord {
    symbol: Option<String>,
    asset_kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FundingDataResponse {
    next: Option<String>,
    #[serde(default)]
    results: Vec<FundingRecord>,
}

#[derive(Debug, Deserialize)]
struct FundingRecord {
    market: Option<String>,
    funding_rate: Option<NumberLike>,
    funding_rate_8h: Option<NumberLike>,
    funding_period_hours: Option<NumberLike>,
    created_at: Option<NumberLike>,
}

impl FundingRecord {
    fn period_hours(&self) -> Option<f64> {
        parse_number(self.funding_period_hours.as_ref()).filter(|h| *h > 0.0)
    }

    /// The rate scaled to 8 hours, reported as the bucket maximum
    fn rate_8h_pct(&self) -> Option<f64> {
        parse_number(self.funding_rate_8h.as_ref()).map(|rate| rate * 100.0)
    }
}

pub struct ParadexConnector {
    base_url: String,
    markets: Vec<String>,
    max_markets: usize,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    state: SharedState<Arc<Vec<String>>>,
}

impl ParadexConnector {
    pub fn new(options: ConnectorOptions, transport: Arc<dyn HttpTransport>) -> Self {
        let policy = RetryPolicy::default();
        Self {
            base_url: options.base_url_or(DEFAULT_BASE_URL).to_string(),
            max_markets: options.instrument_cap(DEFAULT_MAX_MARKETS),
            markets: options.symbols,
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

    /// `{base}/v1/{path}`
    fn url(&self, path: &str) -> ConnectorResult<Url> {
        endpoint(&self.base_url, &format!("/v1/{}", path.trim_start_matches('/')))
    }

    async fn send(&self, request: &HttpRequest) -> ConnectorResult<Value> {
        send_with_retry(self.transport.as_ref(), request, &self.policy).await
    }

    async fn fetch_markets(&self) -> ConnectorResult<Vec<String>> {
        let value = self.send(&HttpRequest::get(self.url("markets")?)).await?;
        let response: MarketsResponse = serde_json::from_value(value)?;

        let markets: Vec<String> = response
            .results
            .into_iter()
            .filter(|m| m.asset_kind.as_deref() == Some("PERP"))
            .filter_map(|m| m.symbol)
            .filter(|s| is_usd_perp(s))
            .collect();

        if markets.is_empty() {
            return Err(ConnectorError::MalformedMetadata(
                "Paradex markets response empty".to_string(),
            ));
        }
        Ok(markets)
    }

    /// Explicit markets, else the cached or freshly listed ones, else defaults
    async fn market_source(&self) -> Arc<Vec<String>> {
        if !self.markets.is_empty() {
            return Arc::new(self.markets.clone());
        }
        if let Some(cached) = self.state.fresh_metadata() {
            return cached;
        }

        match self.fetch_markets().await {
            Ok(markets) => {
                let markets = Arc::new(markets);
                self.state.store_metadata(markets.clone());
                markets
            }
            Err(e) => {
                warn!("Paradex markets error: {}", e);
                self.state
                    .stale_metadata()
                    .unwrap_or_else(|| Arc::new(DEFAULT_MARKETS.iter().map(|m| m.to_string()).collect()))
            }
        }
    }

    fn funding_data(&self, market: &str) -> ConnectorResult<HttpRequest> {
        Ok(HttpRequest::get(self.url("funding/data")?).query("market", market))
    }

    async fn load_latest(&self) -> ConnectorResult<Vec<FundingSnapshot>> {
        let source = self.market_source().await;
        let markets: Vec<&String> = source
            .iter()
            .filter(|m| m.ends_with(MARKET_SUFFIX))
            .take(self.max_markets)
            .collect();

        let mut snapshots = Vec::with_capacity(markets.len());

        for (index, market) in markets.iter().enumerate() {
            if index > 0 {
                self.policy.pace().await;
            }

            let request = self.funding_data(market)?.query("page_size", "1");
            let response = match self.send(&request).await {
                Ok(value) => serde_json::from_value::<FundingDataResponse>(value)?,
                Err(e) if e.is_not_found() => {
                    warn!("Paradex market {} not found", market);
                    continue;
                }
                Err(e) if e.is_rate_limited() => {
                    self.state.start_cooldown();
                    break;
                }
                Err(e) => {
                    warn!("Paradex funding/data error: {}", e);
                    return Err(e);
                }
            };

            let Some(record) = response.results.into_iter().next() else {
                continue;
            };

            snapshots.push(build_snapshot(
                SnapshotParams::new(
                    market.as_str(),
                    EXCHANGE,
                    fraction_to_pct(parse_number(record.funding_rate.as_ref())),
                    record.period_hours().unwrap_or(DEFAULT_PERIOD_HOURS),
                )
                .collected_at(record.created_at.as_ref()),
            ));
        }

        if snapshots.is_empty() {
            return Err(ConnectorError::EmptyResponse(
                "Paradex latest funding response empty".to_string(),
            ));
        }
        Ok(snapshots)
    }

    async fn resolve_market(&self, requested: &str) -> String {
        if is_usd_perp(requested) {
            return requested.to_uppercase();
        }

        let wanted = alnum_upper(requested);
        let source = self.market_source().await;
        source
            .iter()
            .find(|market| alnum_upper(market.split('-').next().unwrap_or(market)) == wanted)
            .cloned()
            .unwrap_or_else(|| format!("{}{}", base_ticker(requested), MARKET_SUFFIX))
    }

    async fn load_history(&self, market: &str, params: &HistoryParams) -> ConnectorResult<Vec<FundingHistoryPoint>> {
        let mut cursor: Option<String> = None;
        let mut points = Vec::new();

        loop {
            let mut request = self
                .funding_data(market)?
                .query("start_at", params.from_ms().to_string())
                .query("end_at", params.to_ms().to_string())
                .query("page_size", HISTORY_PAGE_SIZE.to_string());
            if let Some(next) = &cursor {
                request = request.query("cursor", next);
            }

            let response = match self.send(&request).await {
                Ok(value) => serde_json::from_value::<FundingDataResponse>(value)?,
                Err(e) if e.is_not_found() => {
                    warn!("Paradex market {} not found for history", market);
                    break;
                }
                Err(e) if e.is_rate_limited() => {
                    warn!("Paradex rate limit encountered for {} history", market);
                    self.state.start_cooldown();
                    break;
                }
                Err(e) => return Err(e),
            };

            for record in response.results {
                points.push(build_history_point(
                    HistoryPointParams::new(
                        record.market.clone().unwrap_or_else(|| market.to_string()),
                        EXCHANGE,
                        record.created_at.as_ref(),
                        record.period_hours().unwrap_or(params.granularity_hours),
                        fraction_to_pct(parse_number(record.funding_rate.as_ref())),
                    )
                    .bounds(None, record.rate_8h_pct())
                    .source_count(1),
                ));
            }

            cursor = response.next.filter(|next| !next.is_empty());
            if cursor.is_none() {
                break;
            }
            self.policy.pace().await;
        }

        if points.is_empty() {
            info!("Paradex funding history empty for {}", market);
            return Err(ConnectorError::EmptyResponse(format!(
                "Paradex funding history empty for {}",
                market
            )));
        }
        Ok(points)
    }
}

#[async_trait]
impl FundingConnector for ParadexConnector {
    fn name(&self) -> &str {
        EXCHANGE
    }

    async fn fetch_latest(&self) -> ConnectorResult<Vec<FundingSnapshot>> {
        self.state.guard_latest(self.load_latest()).await
    }

    async fn fetch_history(&self, symbol: &str, params: &HistoryParams) -> ConnectorResult<Vec<FundingHistoryPoint>> {
        let market = self.resolve_market(symbol).await;
        let key = history_request_key(&market, params);
        self.state.guard_history(&key, self.load_history(&market, params)).await
    }
}

fn is_usd_perp(symbol: &str) -> bool {
    symbol.to_ascii_uppercase().ends_with(MARKET_SUFFIX)
}
