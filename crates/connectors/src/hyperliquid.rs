//! Hyperliquid adapter
//!
//! Everything goes through `POST /info`. Latest funding is the `HlPerp` venue
//! of `predictedFundings`; history is `fundingHistory`, paged forward by
//! time in blocks of at most 500 records.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use funding_core::{
    build_history_point, build_snapshot, fraction_to_pct, parse_number, to_canonical_timestamp, ConnectorError,
    ConnectorOptions, ConnectorResult, FundingHistoryPoint, FundingSnapshot, HistoryParams, HistoryPointParams,
    NumberLike, SnapshotParams, DEFAULT_PERIOD_HOURS,
};

use crate::connector::FundingConnector;
use crate::http::{endpoint, HttpRequest, HttpTransport};
use crate::retry::{send_with_retry, RetryPolicy};
use crate::state::{history_request_key, SharedState, METADATA_TTL};
use crate::symbols::base_ticker;

pub const DEFAULT_BASE_URL: &str = "https://api.hyperliquid.xyz";

const EXCHANGE: &str = "Hyperliquid";
const PERP_VENUE: &str = "HlPerp";
const HISTORY_PAGE_LIMIT: usize = 500;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VenueFunding {
    funding_rate: Option<NumberLike>,
    next_funding_time: Option<NumberLike>,
    funding_interval_hours: Option<NumberLike>,
}

/// `[[coin, [[venue, funding | null], ...]], ...]`
type PredictedFundings = Vec<(String, Vec<(String, Option<VenueFunding>)>)>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    coin: Option<String>,
    funding_rate: Option<NumberLike>,
    #[serde(rename = "fundingRate8h")]
    funding_rate_8h: Option<NumberLike>,
    time: Option<NumberLike>,
    start_time: Option<NumberLike>,
}

impl HistoryRecord {
    fn timestamp(&self) -> Option<&NumberLike> {
        self.time.as_ref().or(self.start_time.as_ref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryPayload {
    Bare(Vec<HistoryRecord>),
    #[serde(rename_all = "camelCase")]
    Wrapped {
        funding_rates: Vec<HistoryRecord>,
    },
}

impl HistoryPayload {
    fn into_records(self) -> Vec<HistoryRecord> {
        match self {
            HistoryPayload::Bare(records) => records,
            HistoryPayload::Wrapped { funding_rates } => funding_rates,
        }
    }
}

pub struct HyperliquidConnector {
    base_url: String,
    coins: Vec<String>,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    state: SharedState<()>,
}

impl HyperliquidConnector {
    pub fn new(options: ConnectorOptions, transport: Arc<dyn HttpTransport>) -> Self {
        let policy = RetryPolicy::default();
        Self {
            base_url: options.base_url_or(DEFAULT_BASE_URL).to_string(),
            coins: options.symbols.iter().map(|s| resolve_coin(s)).collect(),
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

    async fn info(&self, body: Value) -> ConnectorResult<Value> {
        let request = HttpRequest::post_json(endpoint(&self.base_url, "/info")?, body);
        send_with_retry(self.transport.as_ref(), &request, &self.policy)
            .await
            .map_err(|e| {
                warn!("Hyperliquid info error: {}", e);
                e
            })
    }

    async fn load_latest(&self) -> ConnectorResult<Vec<FundingSnapshot>> {
        let value = self.info(json!({ "type": "predictedFundings" })).await?;
        let predicted: PredictedFundings = serde_json::from_value(value)?;

        let snapshots: Vec<FundingSnapshot> = predicted
            .into_iter()
            .filter_map(|(coin, venues)| {
                let funding = venues
                    .into_iter()
                    .find(|(venue, _)| venue == PERP_VENUE)
                    .and_then(|(_, funding)| funding)?;
                let coin = resolve_coin(&coin);
                if !self.coins.is_empty() && !self.coins.contains(&coin) {
                    return None;
                }

                let period_hours = parse_number(funding.funding_interval_hours.as_ref())
                    .filter(|h| *h > 0.0)
                    .unwrap_or(DEFAULT_PERIOD_HOURS);

                Some(build_snapshot(
                    SnapshotParams::new(
                        coin,
                        EXCHANGE,
                        fraction_to_pct(parse_number(funding.funding_rate.as_ref())),
                        period_hours,
                    )
                    .next_funding_at(funding.next_funding_time.as_ref()),
                ))
            })
            .collect();

        if snapshots.is_empty() {
            return Err(ConnectorError::EmptyResponse(
                "Hyperliquid predicted funding response empty".to_string(),
            ));
        }
        Ok(snapshots)
    }

    async fn load_history(&self, symbol: &str, params: &HistoryParams) -> ConnectorResult<Vec<FundingHistoryPoint>> {
        let coin = resolve_coin(symbol);
        let end = params.to_ms();
        let mut start = params.from_ms();
        let mut points = Vec::new();

        loop {
            let value = self
                .info(json!({
                    "type": "fundingHistory",
                    "coin": coin,
                    "startTime": start,
                    "endTime": end,
                }))
                .await?;
            let records = serde_json::from_value::<HistoryPayload>(value)?.into_records();
            let page_len = records.len();
            let mut last_time = None;

            for record in records {
                let bucket_start = to_canonical_timestamp(record.timestamp());
                last_time = bucket_start.map(|t| t.timestamp_millis()).or(last_time);
                let rate = parse_number(record.funding_rate_8h.as_ref()).or(parse_number(record.funding_rate.as_ref()));

                points.push(build_history_point(
                    HistoryPointParams::new(
                        record.coin.as_deref().map(resolve_coin).unwrap_or_else(|| coin.clone()),
                        EXCHANGE,
                        bucket_start,
                        params.granularity_hours,
                        fraction_to_pct(rate),
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
            return Err(ConnectorError::EmptyResponse(format!(
                "Hyperliquid funding history empty for {}",
                symbol
            )));
        }
        Ok(points)
    }
}

#[async_trait]
impl FundingConnector for HyperliquidConnector {
    fn name(&self) -> &str {
        EXCHANGE
    }

    async fn fetch_latest(&self) -> ConnectorResult<Vec<FundingSnapshot>> {
        self.state.guard_latest(self.load_latest()).await
    }

    async fn fetch_history(&self, symbol: &str, params: &HistoryParams) -> ConnectorResult<Vec<FundingHistoryPoint>> {
        let key = history_request_key(&resolve_coin(symbol), params);
        self.state.guard_history(&key, self.load_history(symbol, params)).await
    }
}

fn resolve_coin(symbol: &str) -> String {
    base_ticker(symbol)
}
