//! Router configuration, supplied by the InferenceService controller through
//! the container environment

use std::net::SocketAddr;
use tokio::sync::Semaphore;
use tracing::warn;

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    pub model_ref: String,
    /// Requests admitted at once; further requests wait for a free slot
    pub max_concurrency: usize,
    pub kv_endpoints: Vec<String>,
    /// Pod name reported back in responses
    pub router_pod: String,
    pub listen_addr: SocketAddr,
}

impl RouterConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unusable values fall back to defaults with a warning; the router
    /// always starts.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let listen_addr = match get("LISTEN_ADDR") {
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!("invalid LISTEN_ADDR={:?}, defaulting to 0.0.0.0:5678", value);
                default_listen_addr()
            }),
            None => default_listen_addr(),
        };

        Self {
            model_ref: get("MODEL_REF").unwrap_or_else(|| "unknown-model".to_string()),
            max_concurrency: parse_max_concurrency(get("MAX_CONCURRENCY").as_deref()),
            kv_endpoints: parse_endpoints(get("KV_ENDPOINTS").as_deref()),
            router_pod: get("HOSTNAME").unwrap_or_default(),
            listen_addr,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5678))
}

fn parse_max_concurrency(value: Option<&str>) -> usize {
    let Some(value) = value else {
        return DEFAULT_MAX_CONCURRENCY;
    };
    match value.trim().parse::<usize>() {
        Ok(limit) if limit > 0 && limit <= Semaphore::MAX_PERMITS => limit,
        _ => {
            warn!(
                "invalid MAX_CONCURRENCY={:?}, defaulting to {}",
                value, DEFAULT_MAX_CONCURRENCY
            );
            DEFAULT_MAX_CONCURRENCY
        }
    }
}

fn parse_endpoints(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|endpoint| !endpoint.is_empty())
        .map(str::to_string)
        .collect()
}
