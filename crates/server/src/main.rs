//! Funding-rate aggregator
//!
//! Main entry point: ingest scheduler plus the HTTP API

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use funding_aggregator::{FundingService, IngestScheduler};
use funding_connectors::{default_connectors, ReqwestTransport};
use funding_core::AppConfig;
use funding_server::{spawn_signal_listener, HttpServer, HttpServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting funding aggregator v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env()?;

    let transport = Arc::new(ReqwestTransport::new(Duration::from_millis(
        config.server.http_timeout_ms,
    ))?);
    let connectors = default_connectors(&config.connectors, transport);
    let service = Arc::new(FundingService::new(connectors));
    info!("Connectors enabled: {}", service.connector_names().join(", "));

    let scheduler = IngestScheduler::new(Arc::clone(&service), config.scheduler.clone());
    scheduler.start()?;

    let server = HttpServer::new(
        HttpServerConfig {
            port: config.server.port,
            ..Default::default()
        },
        service,
    );

    let shutdown_rx = spawn_signal_listener()?;

    let served = server.start_with_shutdown(shutdown_rx).await;
    scheduler.shutdown().await;

    if let Err(e) = served {
        error!("Server error: {}", e);
        return Err(e);
    }

    info!("Server shutdown complete");
    Ok(())
}
