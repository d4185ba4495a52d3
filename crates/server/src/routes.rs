//! Route definitions for the funding API

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::debug;

use funding_aggregator::FundingService;
use funding_core::{timestamp, FundingHistoryResponse, SnapshotCache};

const DEFAULT_RANGE_HOURS: u32 = 24;
const DEFAULT_GRANULARITY_HOURS: u32 = 1;

// ── Query params ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct LatestQuery {
    #[serde(default)]
    refresh: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_symbol")]
    symbol: String,
    #[serde(default = "default_range")]
    range: String,
    #[serde(default = "default_granularity")]
    granularity: String,
    #[serde(default)]
    refresh: Option<String>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            range: default_range(),
            granularity: default_granularity(),
            refresh: None,
        }
    }
}

fn default_symbol() -> String {
    "BTC".to_string()
}

fn default_range() -> String {
    "24h".to_string()
}

fn default_granularity() -> String {
    "1h".to_string()
}

/// Only the literal `true` forces a refresh
fn is_forced(refresh: &Option<String>) -> bool {
    refresh.as_deref() == Some("true")
}

// ── Route definitions ────────────────────────────────────────────────────

pub fn router(service: Arc<FundingService>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/funding/latest", get(funding_latest))
        .route("/api/funding/history", get(funding_history))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": timestamp::format(&Utc::now()),
    }))
}

async fn funding_latest(
    State(service): State<Arc<FundingService>>,
    Query(query): Query<LatestQuery>,
) -> Json<SnapshotCache> {
    Json(service.get_cached_latest(is_forced(&query.refresh)).await)
}

async fn funding_history(
    State(service): State<Arc<FundingService>>,
    Query(query): Query<HistoryQuery>,
) -> Json<FundingHistoryResponse> {
    let range_hours = parse_duration_hours(&query.range).unwrap_or(DEFAULT_RANGE_HOURS);
    let granularity_hours =
        parse_duration_hours(&query.granularity).unwrap_or(DEFAULT_GRANULARITY_HOURS);
    debug!(
        "History request for {}: {}h window, {}h buckets",
        query.symbol, range_hours, granularity_hours
    );

    let points = service
        .get_or_refresh_history(
            &query.symbol,
            f64::from(granularity_hours),
            range_hours,
            is_forced(&query.refresh),
        )
        .await;

    Json(FundingHistoryResponse {
        symbol: query.symbol,
        range: query.range,
        granularity: query.granularity,
        points,
    })
}

/// First `<digits>h` or `<digits>d` found anywhere in `input`, in hours.
///
/// `None` when there is no such token or the amount is zero or overflows.
pub fn parse_duration_hours(input: &str) -> Option<u32> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let multiplier = match bytes.get(i) {
            Some(b'h') => 1,
            Some(b'd') => 24,
            _ => continue,
        };
        let amount: u32 = input[start..i].parse().ok()?;
        return amount.checked_mul(multiplier).filter(|hours| *hours > 0);
    }
    None
}
