//! EdgeX adapter
//!
//! Contracts come from the public metadata endpoint and are cached for ten
//! minutes. Latest funding is fetched one contract at a time with a fixed
//! gap; history pages through `getFundingRatePage` with an opaque offset,
//! begin inclusive and end exclusive. Every response is wrapped in a
//! `{code, data}` envelope where anything but `SUCCESS` is a failure.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use funding_core::{
    build_history_point, build_snapshot, fraction_to_pct, parse_number, ConnectorError, ConnectorOptions,
    ConnectorResult, FundingHistoryPoint, FundingSnapshot, HistoryParams, HistoryPointParams, NumberLike,
    SnapshotParams, DEFAULT_PERIOD_HOURS,
};

use crate::connector::FundingConnector;
use crate::http::{endpoint, HttpRequest, HttpTransport};
use crate::retry::{send_with_retry, RetryPolicy};
use crate::state::{history_request_key, SharedState, METADATA_TTL};
use crate::symbols::{alnum_upper, derive_base_symbol};

pub const DEFAULT_BASE_URL: &str = "https://pro.edgex.exchange";
pub const DEFAULT_CONTRACT_IDS: [&str; 2] = ["10000001", "10000002"];
pub const DEFAULT_MAX_CONTRACTS: usize = 200;

const EXCHANGE: &str = "EdgeX";
const SUCCESS: &str = "SUCCESS";
const HISTORY_PAGE_SIZE: u32 = 100;
const REQUEST_INTERVAL: Duration = Duration::from_millis(250);

const META_PATH: &str = "/api/v1/public/meta/getMetaData";
const LATEST_PATH: &str = "/api/v1/public/funding/getLatestFundingRate";
const HISTORY_PATH: &str = "/api/v1/public/funding/getFundingRatePage";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Contract {
    contract_id: String,
    #[serde(default)]
    contract_name: String,
    enable_display: Option<bool>,
    enable_trade: Option<bool>,
    funding_rate_interval_min: Option<NumberLike>,
}

impl Contract {
    fn fallback(id: &str) -> Self {
        Self {
            contract_id: id.to_string(),
            contract_name: id.to_string(),
            enable_display: None,
            enable_trade: None,
            funding_rate_interval_min: None,
        }
    }

    fn is_listed(&self) -> bool {
        self.enable_display != Some(false) && self.enable_trade != Some(false)
    }

    fn label(&self) -> &str {
        if self.contract_name.is_empty() {
            &self.contract_id
        } else {
            &self.contract_name
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaData {
    #[serde(default)]
    contract_list: Vec<Contract>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingRecord {
    contract_id: Option<String>,
    funding_rate: Option<NumberLike>,
    funding_time: Option<NumberLike>,
    funding_timestamp: Option<NumberLike>,
    funding_rate_interval_min: Option<NumberLike>,
    oracle_price: Option<NumberLike>,
    index_price: Option<NumberLike>,
}

impl FundingRecord {
    fn observed_at(&self) -> Option<&NumberLike> {
        self.funding_timestamp.as_ref().or(self.funding_time.as_ref())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryPage {
    #[serde(default)]
    data_list: Vec<FundingRecord>,
    next_page_offset_data: Option<String>,
}

type Contracts = Arc<Vec<Contract>>;

pub struct EdgeXConnector {
    base_url: String,
    contract_ids: Vec<String>,
    max_contracts: usize,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    state: SharedState<Contracts>,
}

impl EdgeXConnector {
    pub fn new(options: ConnectorOptions, transport: Arc<dyn HttpTransport>) -> Self {
        let policy = RetryPolicy::default().with_request_interval(REQUEST_INTERVAL);
        Self {
            base_url: options.base_url_or(DEFAULT_BASE_URL).to_string(),
            contract_ids: options.symbols.iter().map(|id| id.to_uppercase()).collect(),
            max_contracts: options.instrument_cap(DEFAULT_MAX_CONTRACTS),
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

    /// GET `path` and unwrap the `{code, data}` envelope
    async fn get<T: DeserializeOwned + Default>(&self, path: &str, query: &[(&str, String)]) -> ConnectorResult<T> {
        let request = query
            .iter()
            .fold(HttpRequest::get(endpoint(&self.base_url, path)?), |request, (key, value)| {
                request.query(key, value)
            });

        let value: Value = send_with_retry(self.transport.as_ref(), &request, &self.policy).await?;
        let envelope: Envelope<T> = serde_json::from_value(value)?;

        match envelope.code.as_deref() {
            Some(SUCCESS) => Ok(envelope.data.unwrap_or_default()),
            code => Err(ConnectorError::Decode(format!(
                "EdgeX {} response code {}",
                path,
                code.unwrap_or("UNKNOWN")
            ))),
        }
    }

    async fn fetch_contracts(&self) -> ConnectorResult<Vec<Contract>> {
        let meta: MetaData = self.get(META_PATH, &[]).await.map_err(|e| match e {
            ConnectorError::Decode(message) => ConnectorError::MalformedMetadata(message),
            other => other,
        })?;
        Ok(meta.contract_list.into_iter().filter(Contract::is_listed).collect())
    }

    /// Listed contracts narrowed to the configured ids or names. Falls back
    /// to stale metadata, then to the default contract ids.
    async fn contracts(&self) -> Vec<Contract> {
        let listed = match self.state.fresh_metadata() {
            Some(cached) => Some(cached),
            None => match self.fetch_contracts().await {
                Ok(contracts) => {
                    let contracts = Arc::new(contracts);
                    self.state.store_metadata(contracts.clone());
                    Some(contracts)
                }
                Err(e) => {
                    warn!("EdgeX contract resolution fallback due to error: {}", e);
                    self.state.stale_metadata()
                }
            },
        };

        let fallback: Vec<Contract> = DEFAULT_CONTRACT_IDS.iter().map(|id| Contract::fallback(id)).collect();

        let listed = match listed.filter(|contracts| !contracts.is_empty()) {
            Some(listed) => listed,
            None => return self.filter_explicit(&fallback),
        };
        if self.contract_ids.is_empty() {
            return listed.to_vec();
        }

        let filtered = self.filter_explicit(&listed);
        if filtered.is_empty() {
            self.filter_explicit(&fallback)
        } else {
            filtered
        }
    }

    fn filter_explicit(&self, contracts: &[Contract]) -> Vec<Contract> {
        contracts
            .iter()
            .filter(|c| {
                self.contract_ids.is_empty()
                    || self.contract_ids.contains(&c.contract_id.to_uppercase())
                    || self.contract_ids.contains(&c.contract_name.to_uppercase())
            })
            .cloned()
            .collect()
    }

    async fn load_latest(&self) -> ConnectorResult<Vec<FundingSnapshot>> {
        let contracts = self.contracts().await;
        if contracts.is_empty() {
            return Err(ConnectorError::EmptyResponse("EdgeX contracts unavailable".to_string()));
        }

        let mut seen = HashSet::new();
        let targets: Vec<&Contract> = contracts
            .iter()
            .filter(|c| seen.insert(c.contract_id.as_str()))
            .take(self.max_contracts)
            .collect();

        let mut snapshots = Vec::new();

        for (index, contract) in targets.into_iter().enumerate() {
            if self.state.is_cooling_down() {
                break;
            }
            if index > 0 {
                self.policy.pace().await;
            }

            let query = [("contractId", contract.contract_id.clone())];
            let records: Vec<FundingRecord> = match self.get(LATEST_PATH, &query).await {
                Ok(records) => records,
                Err(e) => {
                    warn!("EdgeX failed to fetch latest funding for {}: {}", contract.contract_id, e);
                    if e.is_rate_limited() {
                        self.state.start_cooldown();
                        break;
                    }
                    continue;
                }
            };

            snapshots.extend(
                records
                    .iter()
                    .filter(|r| r.contract_id.as_deref() == Some(contract.contract_id.as_str()))
                    .map(|record| {
                        build_snapshot(
                            SnapshotParams::new(
                                contract.label(),
                                EXCHANGE,
                                fraction_to_pct(parse_number(record.funding_rate.as_ref())),
                                interval_hours(record, contract).unwrap_or(DEFAULT_PERIOD_HOURS),
                            )
                            .mark_price(parse_number(record.index_price.as_ref().or(record.oracle_price.as_ref())))
                            .collected_at(record.observed_at())
                            .next_funding_at(record.funding_time.as_ref()),
                        )
                    }),
            );
        }

        if snapshots.is_empty() {
            return Err(ConnectorError::EmptyResponse("EdgeX latest funding response empty".to_string()));
        }
        Ok(snapshots)
    }

    async fn load_history(&self, symbol: &str, params: &HistoryParams) -> ConnectorResult<Vec<FundingHistoryPoint>> {
        let contracts = self.contracts().await;
        if contracts.is_empty() {
            return Err(ConnectorError::EmptyResponse("EdgeX contracts unavailable".to_string()));
        }
        let contract = find_contract(&contracts, symbol)
            .ok_or_else(|| ConnectorError::EmptyResponse(format!("EdgeX contract not found for symbol {}", symbol)))?;

        let mut cursor: Option<String> = None;
        let mut points = Vec::new();

        loop {
            let mut query = vec![
                ("contractId", contract.contract_id.clone()),
                ("size", HISTORY_PAGE_SIZE.to_string()),
            ];
            if let Some(offset) = &cursor {
                query.push(("offsetData", offset.clone()));
            }
            query.push(("filterBeginTimeInclusive", params.from_ms().to_string()));
            query.push(("filterEndTimeExclusive", params.to_ms().to_string()));

            let page: HistoryPage = match self.get(HISTORY_PATH, &query).await {
                Ok(page) => page,
                Err(e) if e.is_rate_limited() => {
                    warn!("EdgeX rate limit encountered for {} history", contract.contract_id);
                    self.state.start_cooldown();
                    break;
                }
                Err(e) if e.is_not_found() => {
                    warn!("EdgeX contract {} history not found", contract.contract_id);
                    break;
                }
                Err(e) => return Err(e),
            };

            for record in &page.data_list {
                points.push(build_history_point(
                    HistoryPointParams::new(
                        contract.label(),
                        EXCHANGE,
                        record.observed_at().unwrap_or(&NumberLike::Number(params.from_ms() as f64)),
                        interval_hours(record, contract).unwrap_or(params.granularity_hours),
                        fraction_to_pct(parse_number(record.funding_rate.as_ref())),
                    )
                    .source_count(1),
                ));
            }

            cursor = page.next_page_offset_data.filter(|offset| !offset.is_empty());
            if cursor.is_none() {
                break;
            }
            self.policy.pace().await;
        }

        if points.is_empty() {
            debug!("EdgeX funding history empty for {}", symbol);
            return Err(ConnectorError::EmptyResponse(format!("EdgeX funding history empty for {}", symbol)));
        }
        Ok(points)
    }
}

#[async_trait]
impl FundingConnector for EdgeXConnector {
    fn name(&self) -> &str {
        EXCHANGE
    }

    async fn fetch_latest(&self) -> ConnectorResult<Vec<FundingSnapshot>> {
        self.state.guard_latest(self.load_latest()).await
    }

    async fn fetch_history(&self, symbol: &str, params: &HistoryParams) -> ConnectorResult<Vec<FundingHistoryPoint>> {
        let key = history_request_key(symbol, params);
        self.state.guard_history(&key, self.load_history(symbol, params)).await
    }
}

/// Funding interval from the record, else from the contract, in hours
fn interval_hours(record: &FundingRecord, contract: &Contract) -> Option<f64> {
    [&record.funding_rate_interval_min, &contract.funding_rate_interval_min]
        .into_iter()
        .find_map(|minutes| parse_number(minutes.as_ref()).filter(|m| *m > 0.0))
        .map(|minutes| minutes / 60.0)
}

fn find_contract<'a>(contracts: &'a [Contract], symbol: &str) -> Option<&'a Contract> {
    let target = alnum_upper(symbol);
    let target_base = derive_base_symbol(symbol);

    contracts.iter().find(|contract| {
        alnum_upper(&contract.contract_name) == target
            || (!target_base.is_empty() && derive_base_symbol(&contract.contract_name) == target_base)
    })
}
