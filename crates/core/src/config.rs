//! Configuration types

use config::{Config, Environment, Map};
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ConfigResult};

/// Per-connector options. Every field is optional; adapters fill in their own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorOptions {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// Explicit symbol / market / contract allow-list
    pub symbols: Vec<String>,
    /// Cap on how many instruments to poll
    pub max_instruments: Option<usize>,
}

impl ConnectorOptions {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Default::default()
        }
    }

    pub fn base_url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url.as_deref().unwrap_or(default)
    }

    /// Instrument cap clamped to at least one
    pub fn instrument_cap(&self, default: usize) -> usize {
        self.max_instruments.unwrap_or(default).max(1)
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    /// Upstream request timeout
    pub http_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4000,
            http_timeout_ms: 30_000,
        }
    }
}

/// Ingest scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub interval_ms: u64,
    pub history_symbols: Vec<String>,
    pub history_granularity_hours: f64,
    pub history_lookback_hours: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 120_000,
            history_symbols: vec!["BTC".to_string(), "ETH".to_string()],
            history_granularity_hours: 1.0,
            history_lookback_hours: 24,
        }
    }
}

/// Options for each of the five exchange connectors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorsConfig {
    pub aster: ConnectorOptions,
    pub paradex: ConnectorOptions,
    pub lighter: ConnectorOptions,
    pub hyperliquid: ConnectorOptions,
    pub edgex: ConnectorOptions,
}

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub connectors: ConnectorsConfig,
}

const LIST_KEYS: [&str; 5] = [
    "funding_history_symbols",
    "aster_symbols",
    "paradex_markets",
    "hyperliquid_coins",
    "edgex_contract_ids",
];

/// Flat view of the recognised environment variables
#[derive(Debug, Default, Deserialize)]
struct EnvSettings {
    port: Option<u16>,
    http_timeout_ms: Option<u64>,
    funding_refresh_interval_ms: Option<u64>,
    #[serde(default, deserialize_with = "list_value")]
    funding_history_symbols: Option<Vec<String>>,
    funding_history_granularity_hours: Option<f64>,
    funding_history_lookback_hours: Option<u32>,
    aster_base_url: Option<String>,
    aster_api_key: Option<String>,
    aster_api_secret: Option<String>,
    #[serde(default, deserialize_with = "list_value")]
    aster_symbols: Option<Vec<String>>,
    paradex_base_url: Option<String>,
    #[serde(default, deserialize_with = "list_value")]
    paradex_markets: Option<Vec<String>>,
    paradex_max_markets: Option<usize>,
    lighter_base_url: Option<String>,
    hyperliquid_base_url: Option<String>,
    #[serde(default, deserialize_with = "list_value")]
    hyperliquid_coins: Option<Vec<String>>,
    edgex_base_url: Option<String>,
    #[serde(default, deserialize_with = "list_value")]
    edgex_contract_ids: Option<Vec<String>>,
    edgex_max_contracts: Option<usize>,
}

impl AppConfig {
    /// Load from the process environment
    pub fn from_env() -> ConfigResult<Self> {
        Self::load(Environment::default())
    }

    /// Load from an explicit variable map instead of the process environment
    pub fn from_vars(vars: Map<String, String>) -> ConfigResult<Self> {
        Self::load(Environment::default().source(Some(vars)))
    }

    fn load(source: Environment) -> ConfigResult<Self> {
        let source = LIST_KEYS.iter().fold(
            source.try_parsing(true).list_separator(","),
            |env, key| env.with_list_parse_key(key),
        );

        let settings: EnvSettings = Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;

        let config = settings.into_config();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.interval_ms == 0 {
            return Err(ConfigError::Invalid("refresh interval must be positive".to_string()));
        }
        if !(self.scheduler.history_granularity_hours > 0.0) {
            return Err(ConfigError::Invalid("history granularity must be positive".to_string()));
        }
        if self.scheduler.history_lookback_hours == 0 {
            return Err(ConfigError::Invalid("history lookback must be positive".to_string()));
        }
        Ok(())
    }
}

impl EnvSettings {
    fn into_config(self) -> AppConfig {
        let server_defaults = ServerConfig::default();
        let scheduler_defaults = SchedulerConfig::default();

        AppConfig {
            server: ServerConfig {
                port: self.port.unwrap_or(server_defaults.port),
                http_timeout_ms: self.http_timeout_ms.unwrap_or(server_defaults.http_timeout_ms),
            },
            scheduler: SchedulerConfig {
                interval_ms: self
                    .funding_refresh_interval_ms
                    .unwrap_or(scheduler_defaults.interval_ms),
                history_symbols: non_empty(self.funding_history_symbols)
                    .unwrap_or(scheduler_defaults.history_symbols),
                history_granularity_hours: self
                    .funding_history_granularity_hours
                    .unwrap_or(scheduler_defaults.history_granularity_hours),
                history_lookback_hours: self
                    .funding_history_lookback_hours
                    .unwrap_or(scheduler_defaults.history_lookback_hours),
            },
            connectors: ConnectorsConfig {
                aster: ConnectorOptions {
                    base_url: self.aster_base_url,
                    api_key: self.aster_api_key,
                    api_secret: self.aster_api_secret,
                    symbols: non_empty(self.aster_symbols).unwrap_or_default(),
                    max_instruments: None,
                },
                paradex: ConnectorOptions {
                    base_url: self.paradex_base_url,
                    symbols: non_empty(self.paradex_markets).unwrap_or_default(),
                    max_instruments: self.paradex_max_markets,
                    ..Default::default()
                },
                lighter: ConnectorOptions {
                    base_url: self.lighter_base_url,
                    ..Default::default()
                },
                hyperliquid: ConnectorOptions {
                    base_url: self.hyperliquid_base_url,
                    symbols: non_empty(self.hyperliquid_coins).unwrap_or_default(),
                    ..Default::default()
                },
                edgex: ConnectorOptions {
                    base_url: self.edgex_base_url,
                    symbols: non_empty(self.edgex_contract_ids).unwrap_or_default(),
                    max_instruments: self.edgex_max_contracts,
                    ..Default::default()
                },
            },
        }
    }
}

/// A list variable after `try_parsing`: a split array, or a lone scalar
/// when the value had no separator and parsed as a number or flag.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListValue {
    Many(Vec<Scalar>),
    One(Scalar),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Integer(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Flag(b) => b.to_string(),
        }
    }
}

fn list_value<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values = match Option::<ListValue>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(ListValue::Many(items)) => items.into_iter().map(Scalar::into_string).collect(),
        Some(ListValue::One(item)) => vec![item.into_string()],
    };
    Ok(Some(values))
}

/// Trimmed entries, or `None` when nothing remains
fn non_empty(values: Option<Vec<String>>) -> Option<Vec<String>> {
    let cleaned: Vec<String> = values?
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}
