//! Periodic ingest scheduler

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use funding_core::{history_key, HistoryParams, SchedulerConfig};

use crate::service::FundingService;

/// Runs an ingest cycle immediately on start and then every interval.
///
/// Each tick spawns its own cycle task, so a slow cycle never delays the
/// next tick and cycles can overlap.
pub struct IngestScheduler {
    service: Arc<FundingService>,
    config: SchedulerConfig,
    running: Arc<RwLock<bool>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    cycles: Arc<AtomicU64>,
}

impl IngestScheduler {
    pub fn new(service: Arc<FundingService>, config: SchedulerConfig) -> Self {
        Self {
            service,
            config,
            running: Arc::new(RwLock::new(false)),
            shutdown: Mutex::new(None),
            handle: Mutex::new(None),
            cycles: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start ticking. Must be called inside a tokio runtime.
    pub fn start(&self) -> anyhow::Result<()> {
        if self.is_running() {
            anyhow::bail!("ingest scheduler already running");
        }
        if self.config.interval_ms == 0 {
            anyhow::bail!("ingest interval must be positive");
        }

        let period = Duration::from_millis(self.config.interval_ms);
        info!(
            "Starting ingest scheduler: every {:?}, history for {:?} ({})",
            period,
            self.config.history_symbols,
            history_key(self.config.history_granularity_hours, self.config.history_lookback_hours)
        );

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let service = Arc::clone(&self.service);
        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let cycles = Arc::clone(&self.cycles);

        *self.running.write() = true;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let cycle = cycles.fetch_add(1, Ordering::Relaxed) + 1;
                        tokio::spawn(run_cycle(cycle, Arc::clone(&service), config.clone()));
                    }
                    _ = &mut shutdown_rx => {
                        info!("Ingest scheduler shutdown requested");
                        break;
                    }
                }
            }

            *running.write() = false;
        });

        *self.shutdown.lock() = Some(shutdown_tx);
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Stop future ticks. Cycles already in flight run to completion.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            info!("Stopping ingest scheduler");
            let _ = tx.send(());
        }
        *self.running.write() = false;
    }

    /// Stop and wait for the ticking task to exit
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    /// Cycles started so far
    pub fn cycle_count(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

impl Drop for IngestScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Refresh latest, then history for every configured symbol concurrently
pub async fn run_cycle(cycle: u64, service: Arc<FundingService>, config: SchedulerConfig) {
    let start = Instant::now();
    debug!("Ingest cycle {} started", cycle);

    let latest = service.refresh_latest().await;

    let params = HistoryParams::lookback(
        Utc::now(),
        config.history_lookback_hours,
        config.history_granularity_hours,
    );
    let key = history_key(config.history_granularity_hours, config.history_lookback_hours);

    let history = join_all(
        config
            .history_symbols
            .iter()
            .map(|symbol| service.refresh_history_for_symbol(symbol, &params, &key)),
    )
    .await;

    info!(
        "Ingest cycle {} finished in {:?}: {} snapshots, {} history points across {} symbols",
        cycle,
        start.elapsed(),
        latest.snapshots.len(),
        history.iter().map(Vec::len).sum::<usize>(),
        history.len()
    );
}
