//! Controller configuration read from the environment

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Images and timings used when building child resources
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadSettings {
    pub router_image: String,
    pub cache_image: String,
    pub runner_image: String,
    /// Delay before retrying a pass whose referenced object is missing
    pub dependency_requeue: Duration,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            router_image: "ghcr.io/example/inference-router:latest".to_string(),
            cache_image: "redis:7-alpine".to_string(),
            runner_image: "busybox".to_string(),
            dependency_requeue: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Address of the health and metrics endpoint
    pub metrics_addr: SocketAddr,
    pub workloads: WorkloadSettings,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = WorkloadSettings::default();

        let metrics_addr = match get("METRICS_ADDR") {
            Some(value) => value.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
                key: "METRICS_ADDR",
                value: value.clone(),
                reason: e.to_string(),
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let dependency_requeue = match get("DEPENDENCY_REQUEUE_SECS") {
            Some(value) => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                Ok(_) => {
                    return Err(ConfigError::Invalid {
                        key: "DEPENDENCY_REQUEUE_SECS",
                        value,
                        reason: "must be positive".to_string(),
                    })
                }
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        key: "DEPENDENCY_REQUEUE_SECS",
                        value,
                        reason: e.to_string(),
                    })
                }
            },
            None => defaults.dependency_requeue,
        };

        Ok(Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            metrics_addr,
            workloads: WorkloadSettings {
                router_image: get("ROUTER_IMAGE").unwrap_or(defaults.router_image),
                cache_image: get("CACHE_IMAGE").unwrap_or(defaults.cache_image),
                runner_image: get("RUNNER_IMAGE").unwrap_or(defaults.runner_image),
                dependency_requeue,
            },
        })
    }
}
