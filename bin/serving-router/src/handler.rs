//! Request handling with bounded admission
//!
//! At most `max_concurrency` inference requests are processed at once.
//! Requests beyond that wait for a slot; none are rejected for load.

use crate::config::RouterConfig;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
pub struct InferRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InferResponse {
    pub model_ref: String,
    pub prompt: String,
    pub router_pod: String,
    pub kv_endpoints: Vec<String>,
    pub processing_ms: u64,
}

pub struct InferenceHandler {
    config: Arc<RouterConfig>,
    admission: Semaphore,
    /// Simulated model latency per request
    work: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl InferenceHandler {
    pub fn new(config: Arc<RouterConfig>, work: Duration) -> Self {
        Self {
            admission: Semaphore::new(config.max_concurrency),
            config,
            work,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Highest number of requests ever admitted at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Requests currently admitted and being processed
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!("{} {}", method, path);

        let response = match (path.as_str(), &method) {
            ("/healthz", &Method::GET) => text(StatusCode::OK, "ok"),
            ("/readyz", &Method::GET) => text(StatusCode::OK, "ready"),
            ("/infer", &Method::POST) => match req.into_body().collect().await {
                Ok(body) => self.infer(&body.to_bytes()).await,
                Err(e) => {
                    warn!("Failed to read request body: {}", e);
                    text(StatusCode::BAD_REQUEST, "Invalid request body")
                }
            },
            ("/infer", _) => text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
            _ => text(StatusCode::NOT_FOUND, "Not found"),
        };
        Ok(response)
    }

    async fn infer(&self, body: &[u8]) -> Response<Full<Bytes>> {
        let Ok(_permit) = self.admission.acquire().await else {
            return text(StatusCode::SERVICE_UNAVAILABLE, "Shutting down");
        };
        let in_flight = InFlight::enter(&self.in_flight);
        self.peak_in_flight.fetch_max(in_flight.count, Ordering::SeqCst);

        self.process(body).await
    }

    async fn process(&self, body: &[u8]) -> Response<Full<Bytes>> {
        let started = Instant::now();
        let request: InferRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(_) => return text(StatusCode::BAD_REQUEST, "Invalid JSON body"),
        };

        tokio::time::sleep(self.work).await;

        let reply = InferResponse {
            model_ref: self.config.model_ref.clone(),
            prompt: request.prompt,
            router_pod: self.config.router_pod.clone(),
            kv_endpoints: self.config.kv_endpoints.clone(),
            processing_ms: started.elapsed().as_millis() as u64,
        };
        match serde_json::to_vec(&reply) {
            Ok(json) => {
                let mut response = text(StatusCode::OK, json);
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(e) => {
                warn!("Failed to encode response: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

/// Slot in the in-flight count, released on drop
struct InFlight<'a> {
    counter: &'a AtomicUsize,
    count: usize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Self { counter, count }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}
