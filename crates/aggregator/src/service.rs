//! Aggregation service - fans out over connectors and fills the store

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use funding_connectors::FundingConnector;
use funding_core::{history_key, FundingHistoryPoint, FundingSnapshot, HistoryParams, SnapshotCache};

use crate::store::FundingStore;

/// How many offending snapshots an invalid-period warning lists
const INVALID_PERIOD_SAMPLE: usize = 5;

pub struct FundingService {
    connectors: Vec<Arc<dyn FundingConnector>>,
    store: Arc<FundingStore>,
}

impl FundingService {
    pub fn new(connectors: Vec<Arc<dyn FundingConnector>>) -> Self {
        Self::with_store(connectors, Arc::new(FundingStore::new()))
    }

    pub fn with_store(connectors: Vec<Arc<dyn FundingConnector>>, store: Arc<FundingStore>) -> Self {
        Self { connectors, store }
    }

    pub fn store(&self) -> Arc<FundingStore> {
        Arc::clone(&self.store)
    }

    pub fn connector_names(&self) -> Vec<&str> {
        self.connectors.iter().map(|c| c.name()).collect()
    }

    /// Fetch latest from every connector concurrently and replace the cached set.
    ///
    /// Failed connectors are logged and left out; the merge keeps connector order.
    pub async fn refresh_latest(&self) -> SnapshotCache {
        let start = Instant::now();

        let outcomes = join_all(self.connectors.iter().map(|connector| async move {
            (connector.name(), connector.fetch_latest().await)
        }))
        .await;

        let mut snapshots = Vec::new();
        let mut failed = 0;
        for (name, outcome) in outcomes {
            match outcome {
                Ok(batch) => {
                    debug!("{} returned {} snapshots", name, batch.len());
                    snapshots.extend(batch);
                }
                Err(e) => {
                    failed += 1;
                    warn!("Connector {} failed to fetch latest funding: {}", name, e);
                }
            }
        }

        log_invalid_periods(&snapshots);

        let updated_at = snapshots
            .iter()
            .map(|s| s.collected_at)
            .max()
            .unwrap_or_else(Utc::now);

        let cache = SnapshotCache {
            updated_at: Some(updated_at),
            snapshots,
        };
        self.store.set_latest(cache.clone());

        info!(
            "Latest funding refreshed: {} snapshots from {}/{} connectors in {:?}",
            cache.snapshots.len(),
            self.connectors.len() - failed,
            self.connectors.len(),
            start.elapsed()
        );

        cache
    }

    /// Fetch history for one symbol from every connector and store it under
    /// `symbol` + `granularity_key`
    pub async fn refresh_history_for_symbol(
        &self,
        symbol: &str,
        params: &HistoryParams,
        granularity_key: &str,
    ) -> Vec<FundingHistoryPoint> {
        let outcomes = join_all(self.connectors.iter().map(|connector| async move {
            (connector.name(), connector.fetch_history(symbol, params).await)
        }))
        .await;

        let mut points = Vec::new();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(batch) => points.extend(batch),
                Err(e) => warn!("Connector {} failed to fetch history for {}: {}", name, symbol, e),
            }
        }

        debug!("History for {} ({}): {} points", symbol, granularity_key, points.len());
        self.store.set_history(symbol, granularity_key, points.clone());
        points
    }

    /// Cached latest set, refreshed when forced or never populated
    pub async fn get_cached_latest(&self, force_refresh: bool) -> SnapshotCache {
        let cached = self.store.latest();
        if force_refresh || !cached.is_populated() {
            return self.refresh_latest().await;
        }
        cached
    }

    /// Cached history bucket, refreshed when forced or empty
    pub async fn get_cached_history_for_symbol(
        &self,
        symbol: &str,
        params: &HistoryParams,
        granularity_key: &str,
        force_refresh: bool,
    ) -> Vec<FundingHistoryPoint> {
        let cached = self.store.history(symbol, granularity_key);
        if force_refresh || cached.is_empty() {
            return self.refresh_history_for_symbol(symbol, params, granularity_key).await;
        }
        cached
    }

    /// History for the window of `lookback_hours` ending now
    pub async fn get_or_refresh_history(
        &self,
        symbol: &str,
        granularity_hours: f64,
        lookback_hours: u32,
        force_refresh: bool,
    ) -> Vec<FundingHistoryPoint> {
        let params = HistoryParams::lookback(Utc::now(), lookback_hours, granularity_hours);
        let key = history_key(granularity_hours, lookback_hours);
        self.get_cached_history_for_symbol(symbol, &params, &key, force_refresh)
            .await
    }
}

fn log_invalid_periods(snapshots: &[FundingSnapshot]) {
    let invalid: Vec<&FundingSnapshot> = snapshots.iter().filter(|s| !s.has_valid_period()).collect();
    if invalid.is_empty() {
        return;
    }

    let sample = invalid
        .iter()
        .take(INVALID_PERIOD_SAMPLE)
        .map(|s| format!("{}:{} ({})", s.exchange, s.symbol, s.period_hours))
        .collect::<Vec<_>>()
        .join(", ");
    warn!(
        "{} snapshots have a non-positive funding period: {}",
        invalid.len(),
        sample
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::composite_key;
    use crate::testing::{as_connectors, StubConnector};

    fn mixed() -> (Vec<Arc<StubConnector>>, FundingService) {
        let stubs = vec![
            StubConnector::ok("Aster", &["BTCUSDT", "ETHUSDT"]),
            StubConnector::failing("Paradex"),
            StubConnector::ok("Lighter", &["BTC", "ETH"]),
            StubConnector::failing("Hyperliquid"),
            StubConnector::ok("EdgeX", &["BTCUSDT", "ETHUSDT"]),
        ];
        let service = FundingService::new(as_connectors(&stubs));
        (stubs, service)
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successes() {
        let (_, service) = mixed();

        let cache = service.refresh_latest().await;

        assert_eq!(cache.snapshots.len(), 6);
        let exchanges: Vec<&str> = cache.snapshots.iter().map(|s| s.exchange.as_str()).collect();
        assert_eq!(exchanges, vec!["Aster", "Aster", "Lighter", "Lighter", "EdgeX", "EdgeX"]);
        assert!(cache.is_populated());
        assert_eq!(service.store().latest(), cache);
    }

    #[tokio::test]
    async fn test_updated_at_is_latest_collection() {
        let (_, service) = mixed();

        let cache = service.refresh_latest().await;

        let newest = cache.snapshots.iter().map(|s| s.collected_at).max();
        assert_eq!(cache.updated_at, newest);
    }

    #[tokio::test]
    async fn test_all_failing_still_populates() {
        let stubs = vec![StubConnector::failing("Aster"), StubConnector::failing("EdgeX")];
        let service = FundingService::new(as_connectors(&stubs));

        let before = Utc::now();
        let cache = service.refresh_latest().await;

        assert!(cache.snapshots.is_empty());
        assert!(cache.updated_at.unwrap() >= before);
    }

    #[tokio::test]
    async fn test_cached_reads_are_idempotent() {
        let (stubs, service) = mixed();

        let first = service.get_cached_latest(false).await;
        let second = service.get_cached_latest(false).await;

        assert_eq!(first, second);
        assert!(stubs.iter().all(|s| s.latest_calls() == 1));
    }

    #[tokio::test]
    async fn test_force_refresh_always_fans_out() {
        let (stubs, service) = mixed();

        service.get_cached_latest(true).await;
        service.get_cached_latest(true).await;
        service.get_cached_latest(false).await;

        assert!(stubs.iter().all(|s| s.latest_calls() == 2));
    }

    #[tokio::test]
    async fn test_invalid_periods_are_kept() {
        let stubs = vec![
            StubConnector::ok("Aster", &["BTCUSDT"]),
            StubConnector::with_period("Broken", &["BTC", "ETH"], 0.0),
        ];
        let service = FundingService::new(as_connectors(&stubs));

        let cache = service.refresh_latest().await;

        assert_eq!(cache.snapshots.len(), 3);
        assert_eq!(cache.snapshots.iter().filter(|s| !s.has_valid_period()).count(), 2);
    }

    #[tokio::test]
    async fn test_history_refresh_and_cache() {
        let (stubs, service) = mixed();

        let points = service.get_or_refresh_history("btc", 1.0, 24, false).await;
        assert_eq!(points.len(), 3);
        assert_eq!(service.store().history("BTC", "1h-24h"), points);

        let cached = service.get_or_refresh_history("BTC", 1.0, 24, false).await;
        assert_eq!(cached, points);
        assert!(stubs.iter().all(|s| s.history_calls() == 1));

        service.get_or_refresh_history("BTC", 1.0, 24, true).await;
        assert!(stubs.iter().all(|s| s.history_calls() == 2));

        let stats = service.store().stats();
        assert_eq!(stats.history_bucket_count, 1);
        assert!(service.store().history("BTC", "4h-24h").is_empty());
        assert_eq!(composite_key("btc", &history_key(1.0, 24)), "BTC::1h-24h");
    }

    #[tokio::test]
    async fn test_empty_history_bucket_is_refetched() {
        let stubs = vec![StubConnector::failing("Aster")];
        let service = FundingService::new(as_connectors(&stubs));

        assert!(service.get_or_refresh_history("ETH", 1.0, 24, false).await.is_empty());
        assert!(service.get_or_refresh_history("ETH", 1.0, 24, false).await.is_empty());
        assert_eq!(stubs[0].history_calls(), 2);
    }

    #[test]
    fn test_connector_names() {
        let (_, service) = mixed();
        assert_eq!(
            service.connector_names(),
            vec!["Aster", "Paradex", "Lighter", "Hyperliquid", "EdgeX"]
        );
    }
}
