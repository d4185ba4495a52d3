//! Conversion of heterogeneous upstream values into canonical records
//!
//! Exchanges report timestamps as epoch seconds, epoch milliseconds, ISO
//! strings or numeric strings, and rates either as numbers or strings. Every
//! adapter funnels its raw values through these functions so the resulting
//! [`FundingSnapshot`] and [`FundingHistoryPoint`] records are uniform.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{FundingHistoryPoint, FundingSnapshot};

/// Epoch values below this are seconds, everything else milliseconds
pub const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

/// Decimal places kept on history percentages
pub const HISTORY_PRECISION: i32 = 6;

/// Raw timestamp as delivered by an upstream API
#[derive(Debug, Clone, PartialEq)]
pub enum TimestampInput {
    Missing,
    Epoch(f64),
    Text(String),
    Time(DateTime<Utc>),
}

impl From<f64> for TimestampInput {
    fn from(value: f64) -> Self {
        Self::Epoch(value)
    }
}

impl From<i64> for TimestampInput {
    fn from(value: i64) -> Self {
        Self::Epoch(value as f64)
    }
}

impl From<u64> for TimestampInput {
    fn from(value: u64) -> Self {
        Self::Epoch(value as f64)
    }
}

impl From<&str> for TimestampInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for TimestampInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<DateTime<Utc>> for TimestampInput {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Time(value)
    }
}

impl From<&NumberLike> for TimestampInput {
    fn from(value: &NumberLike) -> Self {
        match value {
            NumberLike::Number(n) => Self::Epoch(*n),
            NumberLike::Text(s) => Self::Text(s.clone()),
        }
    }
}

impl<T: Into<TimestampInput>> From<Option<T>> for TimestampInput {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Missing)
    }
}

/// JSON scalar that may arrive as a number or as a numeric string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberLike {
    Number(f64),
    Text(String),
}

impl NumberLike {
    pub fn as_f64(&self) -> Option<f64> {
        parse_number(Some(self))
    }
}

/// Finite numeric value of `value`, or `None` when missing or unparseable
pub fn parse_number(value: Option<&NumberLike>) -> Option<f64> {
    let numeric = match value? {
        NumberLike::Number(n) => *n,
        NumberLike::Text(s) => s.trim().parse::<f64>().ok()?,
    };
    numeric.is_finite().then_some(numeric)
}

/// Canonical UTC instant for any supported timestamp representation
pub fn to_canonical_timestamp(value: impl Into<TimestampInput>) -> Option<DateTime<Utc>> {
    match value.into() {
        TimestampInput::Missing => None,
        TimestampInput::Time(t) => Some(t),
        TimestampInput::Epoch(n) => from_epoch(n),
        TimestampInput::Text(s) => from_text(&s),
    }
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value.abs() < EPOCH_MILLIS_THRESHOLD {
        value * 1000.0
    } else {
        value
    };
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}

fn from_text(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        return from_epoch(n);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    debug!("Unparseable timestamp: {}", trimmed);
    None
}

/// Round half away from zero to `precision` decimal places
pub fn round_to_precision(value: f64, precision: i32) -> f64 {
    let multiplier = 10f64.powi(precision);
    (value * multiplier).round() / multiplier
}

/// Percent value of a fractional rate; missing rates count as zero
pub fn fraction_to_pct(rate: Option<f64>) -> f64 {
    rate.unwrap_or(0.0) * 100.0
}

/// Inputs for [`build_snapshot`]
#[derive(Debug, Clone)]
pub struct SnapshotParams {
    pub symbol: String,
    pub exchange: String,
    pub funding_rate_pct: f64,
    pub period_hours: f64,
    pub mark_price: Option<f64>,
    pub collected_at: TimestampInput,
    pub next_funding_at: TimestampInput,
}

impl SnapshotParams {
    pub fn new(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        funding_rate_pct: f64,
        period_hours: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            funding_rate_pct,
            period_hours,
            mark_price: None,
            collected_at: TimestampInput::Missing,
            next_funding_at: TimestampInput::Missing,
        }
    }

    pub fn mark_price(mut self, mark_price: Option<f64>) -> Self {
        self.mark_price = mark_price;
        self
    }

    pub fn collected_at(mut self, value: impl Into<TimestampInput>) -> Self {
        self.collected_at = value.into();
        self
    }

    pub fn next_funding_at(mut self, value: impl Into<TimestampInput>) -> Self {
        self.next_funding_at = value.into();
        self
    }
}

/// Build a canonical snapshot. An unresolvable `collected_at` becomes now.
pub fn build_snapshot(params: SnapshotParams) -> FundingSnapshot {
    FundingSnapshot {
        symbol: params.symbol,
        exchange: params.exchange,
        funding_rate_pct: params.funding_rate_pct,
        period_hours: params.period_hours,
        mark_price: params.mark_price,
        collected_at: to_canonical_timestamp(params.collected_at).unwrap_or_else(Utc::now),
        next_funding_at: to_canonical_timestamp(params.next_funding_at),
    }
}

/// Inputs for [`build_history_point`]
#[derive(Debug, Clone)]
pub struct HistoryPointParams {
    pub symbol: String,
    pub exchange: String,
    pub bucket_start: TimestampInput,
    pub bucket_duration_hours: f64,
    pub avg_funding_rate_pct: f64,
    pub max_funding_rate_pct: Option<f64>,
    pub min_funding_rate_pct: Option<f64>,
    pub source_count: Option<u32>,
}

impl HistoryPointParams {
    pub fn new(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        bucket_start: impl Into<TimestampInput>,
        bucket_duration_hours: f64,
        avg_funding_rate_pct: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            bucket_start: bucket_start.into(),
            bucket_duration_hours,
            avg_funding_rate_pct,
            max_funding_rate_pct: None,
            min_funding_rate_pct: None,
            source_count: None,
        }
    }

    pub fn source_count(mut self, count: u32) -> Self {
        self.source_count = Some(count);
        self
    }

    pub fn bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_funding_rate_pct = min;
        self.max_funding_rate_pct = max;
        self
    }
}

/// Build a canonical history point with percentages rounded to 6 places.
/// Max and min fall back to the average.
pub fn build_history_point(params: HistoryPointParams) -> FundingHistoryPoint {
    let avg = params.avg_funding_rate_pct;
    FundingHistoryPoint {
        symbol: params.symbol,
        exchange: params.exchange,
        bucket_start: to_canonical_timestamp(params.bucket_start).unwrap_or_else(Utc::now),
        bucket_duration_hours: params.bucket_duration_hours,
        avg_funding_rate_pct: round_to_precision(avg, HISTORY_PRECISION),
        max_funding_rate_pct: round_to_precision(params.max_funding_rate_pct.unwrap_or(avg), HISTORY_PRECISION),
        min_funding_rate_pct: round_to_precision(params.min_funding_rate_pct.unwrap_or(avg), HISTORY_PRECISION),
        source_count: params.source_count.unwrap_or(0),
    }
}
