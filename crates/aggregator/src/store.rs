//! In-memory funding cache
//!
//! One slot for the latest merged snapshot set, replaced wholesale on every
//! refresh, and a DashMap of history point lists keyed by symbol and window.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use funding_core::{FundingHistoryPoint, SnapshotCache};

/// `SYMBOL::granularity-key`, symbol uppercased
pub fn composite_key(symbol: &str, granularity_key: &str) -> String {
    format!("{}::{}", symbol.to_uppercase(), granularity_key)
}

#[derive(Debug, Default)]
pub struct FundingStore {
    latest: RwLock<SnapshotCache>,
    history: DashMap<String, Vec<FundingHistoryPoint>>,
    write_count: AtomicU64,
}

impl FundingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a latest set and history buckets
    pub fn with_seed(
        latest: SnapshotCache,
        history: impl IntoIterator<Item = (String, Vec<FundingHistoryPoint>)>,
    ) -> Self {
        Self {
            latest: RwLock::new(latest),
            history: history.into_iter().collect(),
            write_count: AtomicU64::new(0),
        }
    }

    pub fn latest(&self) -> SnapshotCache {
        self.latest.read().clone()
    }

    pub fn set_latest(&self, cache: SnapshotCache) {
        *self.latest.write() = cache;
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Points stored for `symbol` under `granularity_key`; empty when absent
    pub fn history(&self, symbol: &str, granularity_key: &str) -> Vec<FundingHistoryPoint> {
        self.history
            .get(&composite_key(symbol, granularity_key))
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    pub fn set_history(&self, symbol: &str, granularity_key: &str, points: Vec<FundingHistoryPoint>) {
        self.history.insert(composite_key(symbol, granularity_key), points);
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> StoreStats {
        let latest = self.latest.read();
        StoreStats {
            snapshot_count: latest.snapshots.len(),
            updated_at: latest.updated_at,
            history_bucket_count: self.history.len(),
            history_point_count: self.history.iter().map(|e| e.value().len()).sum(),
            write_count: self.write_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub snapshot_count: usize,
    pub updated_at: Option<DateTime<Utc>>,
    pub history_bucket_count: usize,
    pub history_point_count: usize,
    pub write_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{point, snapshot};

    #[test]
    fn test_empty_store() {
        let store = FundingStore::new();

        assert!(!store.latest().is_populated());
        assert!(store.history("BTC", "1h-24h").is_empty());
        assert_eq!(store.stats().write_count, 0);
    }

    #[test]
    fn test_history_keys_are_case_insensitive_on_symbol() {
        let store = FundingStore::new();
        store.set_history("btc", "1h-24h", vec![point("BTC", 0.01)]);

        assert_eq!(store.history("BTC", "1h-24h").len(), 1);
        assert!(store.history("BTC", "4h-24h").is_empty());
        assert_eq!(composite_key("eth", "1h-24h"), "ETH::1h-24h");
    }

    #[test]
    fn test_latest_replaced_wholesale() {
        let store = FundingStore::new();
        let first = SnapshotCache {
            updated_at: Some(Utc::now()),
            snapshots: vec![snapshot("Aster", "BTCUSDT"), snapshot("Aster", "ETHUSDT")],
        };
        store.set_latest(first);

        let second = SnapshotCache {
            updated_at: Some(Utc::now()),
            snapshots: vec![snapshot("Paradex", "BTC-USD-PERP")],
        };
        store.set_latest(second.clone());

        assert_eq!(store.latest(), second);
        let stats = store.stats();
        assert_eq!(stats.snapshot_count, 1);
        assert_eq!(stats.write_count, 2);
    }

    #[test]
    fn test_seeded_store() {
        let seed = SnapshotCache {
            updated_at: Some(Utc::now()),
            snapshots: vec![snapshot("EdgeX", "BTCUSDT")],
        };
        let store = FundingStore::with_seed(
            seed,
            vec![(composite_key("BTC", "1h-24h"), vec![point("BTC", 0.01), point("BTC", 0.02)])],
        );

        assert!(store.latest().is_populated());
        let stats = store.stats();
        assert_eq!(stats.history_bucket_count, 1);
        assert_eq!(stats.history_point_count, 2);
    }

    #[test]
    fn test_concurrent_history_writes() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(FundingStore::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for j in 0..50 {
                        store.set_history(&format!("SYM{}", i), &format!("{}h-24h", j), vec![]);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let stats = store.stats();
        assert_eq!(stats.history_bucket_count, 200);
        assert_eq!(stats.write_count, 200);
    }
}
