//! HTTP transport used by every exchange adapter

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::debug;

use funding_core::{ConnectorError, ConnectorResult};

/// Response bodies are cut to this many characters in error messages
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One JSON request against an upstream API
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            body: None,
        }
    }

    pub fn post_json(url: Url, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append one query parameter
    pub fn query(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.url.query_pairs_mut().append_pair(key, value.as_ref());
        self
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }
}

/// Sends a request and returns the decoded JSON body.
///
/// Implementations map non-2xx responses with [`classify_status`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> ConnectorResult<Value>;
}

/// Map a non-success status to the matching error kind
pub fn classify_status(status: u16, url: &str, body: &str) -> ConnectorError {
    match status {
        404 => ConnectorError::NotFound { url: url.to_string() },
        429 => ConnectorError::RateLimited { url: url.to_string() },
        _ => ConnectorError::Http {
            status,
            url: url.to_string(),
            message: body.chars().take(ERROR_BODY_LIMIT).collect(),
        },
    }
}

/// Parse `base` and append `path` to its path, dropping any query
pub fn endpoint(base: &str, path: &str) -> ConnectorResult<Url> {
    let mut url = Url::parse(base).map_err(|e| ConnectorError::InvalidUrl {
        url: base.to_string(),
        message: e.to_string(),
    })?;
    let prefix = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{}/{}", prefix, path.trim_start_matches('/')));
    url.set_query(None);
    Ok(url)
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> ConnectorResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("funding-aggregator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConnectorError::Network {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> ConnectorResult<Value> {
        let url = request.url.to_string();
        debug!("{:?} {}", request.method, url);

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(request.url.clone()),
            HttpMethod::Post => self.client.post(request.url.clone()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| ConnectorError::Network {
            url: url.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no-body>".to_string());
            return Err(classify_status(status.as_u16(), &url, &body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ConnectorError::Decode(format!("{}: {}", url, e)))
    }
}
