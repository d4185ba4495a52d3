//! Core type definitions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Funding period assumed when an exchange gives no way to infer one.
pub const DEFAULT_PERIOD_HOURS: f64 = 8.0;

/// One exchange's current funding state for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingSnapshot {
    /// Exchange-native spelling, e.g. `BTCUSDT` or `BTC-USD-PERP`
    pub symbol: String,
    pub exchange: String,
    /// Signed percentage for one funding period
    pub funding_rate_pct: f64,
    pub period_hours: f64,
    pub mark_price: Option<f64>,
    #[serde(with = "timestamp")]
    pub collected_at: DateTime<Utc>,
    #[serde(with = "timestamp::option")]
    pub next_funding_at: Option<DateTime<Utc>>,
}

impl FundingSnapshot {
    pub fn has_valid_period(&self) -> bool {
        self.period_hours.is_finite() && self.period_hours > 0.0
    }
}

/// One bucket of aggregated historical funding for one symbol/exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingHistoryPoint {
    pub symbol: String,
    pub exchange: String,
    #[serde(with = "timestamp")]
    pub bucket_start: DateTime<Utc>,
    pub bucket_duration_hours: f64,
    pub avg_funding_rate_pct: f64,
    pub max_funding_rate_pct: f64,
    pub min_funding_rate_pct: f64,
    pub source_count: u32,
}

/// Time window for a history request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryParams {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub granularity_hours: f64,
}

impl HistoryParams {
    /// Window of `lookback_hours` ending at `now`
    pub fn lookback(now: DateTime<Utc>, lookback_hours: u32, granularity_hours: f64) -> Self {
        Self {
            from: now - Duration::hours(i64::from(lookback_hours)),
            to: now,
            granularity_hours,
        }
    }

    pub fn from_ms(&self) -> i64 {
        self.from.timestamp_millis()
    }

    pub fn to_ms(&self) -> i64 {
        self.to.timestamp_millis()
    }

    /// Window identity independent of where it ends, e.g. `1h-24h`
    pub fn window_key(&self) -> String {
        let span_hours = (self.to_ms() - self.from_ms()) as f64 / 3_600_000.0;
        format!("{}h-{}h", self.granularity_hours, span_hours)
    }
}

/// Latest merged snapshot set. `updated_at == None` means never populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCache {
    #[serde(with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
    pub snapshots: Vec<FundingSnapshot>,
}

impl SnapshotCache {
    pub fn is_populated(&self) -> bool {
        self.updated_at.is_some()
    }
}

/// `GET /funding/history` envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingHistoryResponse {
    pub symbol: String,
    pub range: String,
    pub granularity: String,
    pub points: Vec<FundingHistoryPoint>,
}

/// Composite history cache key component, e.g. `1h-24h`
pub fn history_key(granularity_hours: f64, lookback_hours: u32) -> String {
    format!("{}h-{}h", granularity_hours, lookback_hours)
}

/// RFC 3339 UTC with millisecond precision, e.g. `2023-11-14T22:13:20.000Z`
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        DateTime::<Utc>::deserialize(deserializer)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_str(&super::format(v)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<DateTime<Utc>>::deserialize(deserializer)
        }
    }
}
