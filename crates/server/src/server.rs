//! HTTP server configuration and startup

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};

use funding_aggregator::FundingService;

use crate::routes::router;

#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
        }
    }
}

/// axum server over a shared funding service
pub struct HttpServer {
    config: HttpServerConfig,
    service: Arc<FundingService>,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, service: Arc<FundingService>) -> Self {
        Self { config, service }
    }

    pub fn service(&self) -> Arc<FundingService> {
        Arc::clone(&self.service)
    }

    /// Serve until `shutdown` fires, then drain open connections
    pub async fn start_with_shutdown(&self, shutdown: oneshot::Receiver<()>) -> anyhow::Result<()> {
        let addr: SocketAddr = self.address().parse()?;
        let listener = TcpListener::bind(addr).await?;

        info!("HTTP server listening on http://{}", listener.local_addr()?);

        axum::serve(listener, router(Arc::clone(&self.service)))
            .with_graceful_shutdown(async {
                shutdown.await.ok();
                info!("Shutdown signal received");
            })
            .await?;

        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

/// Fire the returned receiver on Ctrl+C or SIGTERM.
///
/// Fails when the SIGTERM handler cannot be installed. Must be called inside
/// a tokio runtime.
pub fn spawn_signal_listener() -> anyhow::Result<oneshot::Receiver<()>> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    #[cfg(unix)]
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = sigterm.recv();

        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            result = signal::ctrl_c() => match result {
                Ok(()) => info!("Received Ctrl+C"),
                Err(e) => error!("Ctrl+C listener failed: {}", e),
            },
            _ = terminate => {
                info!("Received termination signal");
            }
        }

        let _ = shutdown_tx.send(());
    });

    Ok(shutdown_rx)
}
