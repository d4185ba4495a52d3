//! Error types

use thiserror::Error;

/// Errors raised by exchange connectors
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    #[error("Request failed with status {status} – {message}")]
    Http { status: u16, url: String, message: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("{0}")]
    EmptyResponse(String),

    #[error("Not found: {url}")]
    NotFound { url: String },

    #[error("Rate limited: {url}")]
    RateLimited { url: String },

    #[error("{exchange} is cooling down after rate limiting")]
    CoolingDown { exchange: String },

    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

impl ConnectorError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// HTTP status carried by the error, if it came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Http { url, .. }
            | Self::Network { url, .. }
            | Self::NotFound { url }
            | Self::RateLimited { url }
            | Self::InvalidUrl { url, .. } => Some(url),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias
pub type ConnectorResult<T> = Result<T, ConnectorError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
