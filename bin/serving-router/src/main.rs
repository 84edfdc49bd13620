use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::fmt::init as tracing_init;

mod config;
mod handler;
mod server;

use config::RouterConfig;
use handler::InferenceHandler;

/// Simulated model latency per request
const WORK: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let config = Arc::new(RouterConfig::from_env());
    info!(
        model_ref = %config.model_ref,
        max_concurrency = config.max_concurrency,
        kv_endpoints = ?config.kv_endpoints,
        "Starting serving-router"
    );

    let handler = Arc::new(InferenceHandler::new(config.clone(), WORK));
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("Router listening on {}", config.listen_addr);

    server::serve(listener, handler.clone(), shutdown_signal()).await;
    info!(peak_in_flight = handler.peak_in_flight(), "Router stopped");

    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let interrupt = signal_or_pending("SIGINT", tokio::signal::ctrl_c());

    #[cfg(unix)]
    let terminate = signal_or_pending("SIGTERM", async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())?.recv().await;
        Ok::<(), std::io::Error>(())
    });

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}

/// Wait for `signal`. A signal that cannot be registered is logged and then
/// never fires.
async fn signal_or_pending<E, F>(name: &str, signal: F)
where
    E: std::fmt::Display,
    F: Future<Output = Result<(), E>>,
{
    if let Err(e) = signal.await {
        warn!("Unable to listen for {}: {}", name, e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_signal_registration_never_fires() {
        let failed = signal_or_pending("SIGTERM", async { Err::<(), _>("not supported") });
        let result = tokio::time::timeout(Duration::from_millis(50), failed).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delivered_signal_fires() {
        let delivered = signal_or_pending("SIGTERM", async { Ok::<(), &str>(()) });
        tokio::time::timeout(Duration::from_millis(50), delivered)
            .await
            .unwrap();
    }
}
