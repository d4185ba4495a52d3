//! Per-adapter mutable state
//!
//! Each adapter instance owns one [`SharedState`]: a metadata cache with a
//! TTL, the last successful latest/history results and the instant until
//! which the adapter is cooling down after exhausting its rate-limit
//! retries. The mutex is only ever held for short synchronous sections.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use funding_core::{ConnectorError, ConnectorResult, FundingHistoryPoint, FundingSnapshot, HistoryParams};

/// Metadata refresh interval shared by the adapters that cache markets/contracts
pub const METADATA_TTL: Duration = Duration::from_secs(10 * 60);

/// Last-good history key: the instrument plus the window's span and
/// granularity, so rolling windows ending at different instants share a slot
pub fn history_request_key(instrument: &str, params: &HistoryParams) -> String {
    format!("{}::{}", instrument.to_uppercase(), params.window_key())
}

/// A value with the instant it was stored
#[derive(Debug, Clone)]
pub struct TtlCache<T> {
    ttl: Duration,
    entry: Option<(T, Instant)>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    /// Value stored within the TTL
    pub fn fresh(&self) -> Option<T> {
        self.entry
            .as_ref()
            .filter(|(_, stored_at)| stored_at.elapsed() < self.ttl)
            .map(|(value, _)| value.clone())
    }

    /// Value regardless of age
    pub fn stale(&self) -> Option<T> {
        self.entry.as_ref().map(|(value, _)| value.clone())
    }

    pub fn store(&mut self, value: T) {
        self.entry = Some((value, Instant::now()));
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }
}

#[derive(Debug)]
pub struct AdapterState<M> {
    pub metadata: TtlCache<M>,
    last_latest: Option<Vec<FundingSnapshot>>,
    last_history: HashMap<String, Vec<FundingHistoryPoint>>,
    rate_limited_until: Option<Instant>,
}

impl<M: Clone> AdapterState<M> {
    fn new(metadata_ttl: Duration) -> Self {
        Self {
            metadata: TtlCache::new(metadata_ttl),
            last_latest: None,
            last_history: HashMap::new(),
            rate_limited_until: None,
        }
    }

    fn cooling_down(&self, now: Instant) -> bool {
        self.rate_limited_until.map_or(false, |until| now < until)
    }
}

/// Adapter state behind a mutex, plus the cooldown window length
#[derive(Debug)]
pub struct SharedState<M> {
    exchange: &'static str,
    cooldown: Duration,
    inner: Mutex<AdapterState<M>>,
}

impl<M: Clone> SharedState<M> {
    pub fn new(exchange: &'static str, metadata_ttl: Duration, cooldown: Duration) -> Self {
        Self {
            exchange,
            cooldown,
            inner: Mutex::new(AdapterState::new(metadata_ttl)),
        }
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldown = cooldown;
    }

    pub fn is_cooling_down(&self) -> bool {
        self.inner.lock().cooling_down(Instant::now())
    }

    pub fn start_cooldown(&self) {
        warn!("{} rate limited, cooling down for {:?}", self.exchange, self.cooldown);
        self.inner.lock().rate_limited_until = Some(Instant::now() + self.cooldown);
    }

    pub fn fresh_metadata(&self) -> Option<M> {
        self.inner.lock().metadata.fresh()
    }

    pub fn stale_metadata(&self) -> Option<M> {
        self.inner.lock().metadata.stale()
    }

    pub fn store_metadata(&self, value: M) {
        self.inner.lock().metadata.store(value);
    }

    #[cfg(test)]
    pub(crate) fn history_slots(&self) -> usize {
        self.inner.lock().last_history.len()
    }

    /// Run a latest fetch under the cooldown and last-good rules
    pub async fn guard_latest<F>(&self, fetch: F) -> ConnectorResult<Vec<FundingSnapshot>>
    where
        F: Future<Output = ConnectorResult<Vec<FundingSnapshot>>>,
    {
        self.guarded(
            |state| state.last_latest.clone(),
            |state, value| state.last_latest = Some(value.clone()),
            fetch,
        )
        .await
    }

    /// Same as [`guard_latest`](Self::guard_latest) for one history request key
    pub async fn guard_history<F>(&self, key: &str, fetch: F) -> ConnectorResult<Vec<FundingHistoryPoint>>
    where
        F: Future<Output = ConnectorResult<Vec<FundingHistoryPoint>>>,
    {
        self.guarded(
            |state| state.last_history.get(key).cloned(),
            |state, value| {
                state.last_history.insert(key.to_string(), value.clone());
            },
            fetch,
        )
        .await
    }

    /// While cooling down, serve the last-good value without running `fetch`.
    /// Otherwise run it, remember a success and fall back to last-good on
    /// rate limiting or an empty upstream.
    async fn guarded<T, F>(
        &self,
        last_good: impl Fn(&AdapterState<M>) -> Option<T>,
        remember: impl FnOnce(&mut AdapterState<M>, &T),
        fetch: F,
    ) -> ConnectorResult<T>
    where
        F: Future<Output = ConnectorResult<T>>,
    {
        {
            let state = self.inner.lock();
            if state.cooling_down(Instant::now()) {
                return match last_good(&state) {
                    Some(value) => {
                        debug!("{} cooling down, serving last result", self.exchange);
                        Ok(value)
                    }
                    None => Err(ConnectorError::CoolingDown {
                        exchange: self.exchange.to_string(),
                    }),
                };
            }
        }

        let result = fetch.await;

        let mut state = self.inner.lock();
        match result {
            Ok(value) => {
                remember(&mut state, &value);
                Ok(value)
            }
            Err(err) => {
                if err.is_rate_limited() {
                    warn!("{} rate limited, cooling down for {:?}", self.exchange, self.cooldown);
                    state.rate_limited_until = Some(Instant::now() + self.cooldown);
                }
                let recoverable = err.is_rate_limited() || matches!(err, ConnectorError::EmptyResponse(_));
                match last_good(&state).filter(|_| recoverable) {
                    Some(value) => {
                        warn!("{} fetch failed ({}), serving last result", self.exchange, err);
                        Ok(value)
                    }
                    None => Err(err),
                }
            }
        }
    }
}
