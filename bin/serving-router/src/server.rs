//! Accept loop with graceful draining

use crate::handler::InferenceHandler;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Serve connections from `listener` until `shutdown` resolves, then stop
/// accepting and wait for the connections already open to finish.
pub async fn serve<F>(listener: TcpListener, handler: Arc<InferenceHandler>, shutdown: F)
where
    F: Future<Output = ()>,
{
    let graceful = GracefulShutdown::new();
    let mut shutdown = std::pin::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Error accepting connection: {}", e);
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let handler = handler.clone();
                let service = service_fn(move |req| {
                    let handler = handler.clone();
                    async move { handler.handle(req).await }
                });

                let connection = graceful.watch(http1::Builder::new().serve_connection(io, service));
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        debug!("Error serving connection from {}: {}", peer_addr, e);
                    }
                });
            }
            _ = &mut shutdown => {
                info!(
                    in_flight = handler.in_flight(),
                    "Shutdown signal received, draining in-flight requests"
                );
                break;
            }
        }
    }

    drop(listener);
    graceful.shutdown().await;
}
