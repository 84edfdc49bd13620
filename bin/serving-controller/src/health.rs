//! Liveness and Prometheus endpoints of the controller process

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serving_core::ReconcileMetrics;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub async fn serve(addr: SocketAddr, metrics: ReconcileMetrics) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Health and metrics server listening on {}", addr);

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Error accepting health connection: {}", e);
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let metrics = metrics.clone();
                async move { Ok::<_, Infallible>(handle(&req, &metrics)) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving health connection from {}: {}", peer_addr, e);
            }
        });
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn handle(req: &Request<Incoming>, metrics: &ReconcileMetrics) -> Response<Full<Bytes>> {
    route(req.method(), req.uri().path(), metrics)
}

fn route(method: &Method, path: &str, metrics: &ReconcileMetrics) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/healthz") => text(StatusCode::OK, "OK\n"),
        (&Method::GET, "/metrics") => match metrics.gather() {
            Ok(body) => {
                let mut response = text(StatusCode::OK, body);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to gather metrics\n")
            }
        },
        _ => text(StatusCode::NOT_FOUND, "Not Found\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::Duration;

    async fn body(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let metrics = ReconcileMetrics::new().unwrap();
        let response = route(&Method::GET, "/healthz", &metrics);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, "OK\n");
    }

    #[tokio::test]
    async fn test_metrics() {
        let metrics = ReconcileMetrics::new().unwrap();
        metrics.observe("InferenceService", "converged", Duration::from_millis(1));
        let response = route(&Method::GET, "/metrics", &metrics);
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body(response).await.contains("reconciliations_total"));
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let metrics = ReconcileMetrics::new().unwrap();
        assert_eq!(
            route(&Method::GET, "/nope", &metrics).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            route(&Method::POST, "/healthz", &metrics).status(),
            StatusCode::NOT_FOUND
        );
    }
}
