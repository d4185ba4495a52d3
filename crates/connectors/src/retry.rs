//! Rate-limit retry and pacing

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use funding_core::ConnectorResult;

use crate::http::{HttpRequest, HttpTransport};

/// How an adapter reacts to HTTP 429 and paces sequential requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first
    pub max_attempts: u32,
    /// Backoff before retry `n` is `base_delay * n`
    pub base_delay: Duration,
    /// How long the adapter stays quiet after retries run out
    pub cooldown: Duration,
    /// Gap between sequential requests in one pagination or fan-out loop
    pub request_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            cooldown: Duration::from_secs(60),
            request_interval: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// No sleeping between attempts or requests
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            request_interval: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Backoff before the retry that follows failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Sleep for the request interval
    pub async fn pace(&self) {
        if !self.request_interval.is_zero() {
            tokio::time::sleep(self.request_interval).await;
        }
    }
}

/// Send `request`, retrying only on 429 with linear backoff.
///
/// Returns the final `RateLimited` error once `max_attempts` are spent.
pub async fn send_with_retry(
    transport: &dyn HttpTransport,
    request: &HttpRequest,
    policy: &RetryPolicy,
) -> ConnectorResult<Value> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match transport.send(request).await {
            Err(err) if err.is_rate_limited() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                debug!(
                    "Rate limited on {} (attempt {}/{}), retrying in {:?}",
                    request.url, attempt, max_attempts, delay
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(err) if err.is_rate_limited() => {
                warn!("Rate limit retries exhausted for {}", request.url);
                return Err(err);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, ScriptedTransport};
    use reqwest::Url;
    use serde_json::json;

    fn request() -> HttpRequest {
        HttpRequest::get(Url::parse("https://api.example.com/v1/funding/data").unwrap())
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(RetryPolicy::immediate().backoff(2), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let transport = ScriptedTransport::new().route(
            "/v1/funding/data",
            vec![Scripted::Status(429), Scripted::Json(json!({ "ok": true }))],
        );

        let value = send_with_retry(&transport, &request(), &RetryPolicy::immediate())
            .await
            .unwrap();

        assert_eq!(value["ok"], true);
        assert_eq!(transport.calls("/v1/funding/data"), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let transport = ScriptedTransport::new().route("/v1/funding/data", vec![Scripted::Status(429)]);

        let err = tokio_test::assert_err!(send_with_retry(&transport, &request(), &RetryPolicy::immediate()).await);

        assert!(err.is_rate_limited());
        assert_eq!(transport.calls("/v1/funding/data"), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let transport = ScriptedTransport::new().route("/v1/funding/data", vec![Scripted::Status(500)]);

        let err = tokio_test::assert_err!(send_with_retry(&transport, &request(), &RetryPolicy::immediate()).await);

        assert_eq!(err.status(), Some(500));
        assert_eq!(transport.calls("/v1/funding/data"), 1);
    }
}
