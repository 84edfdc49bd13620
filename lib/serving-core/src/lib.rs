//! Reconciliation core for the model serving controllers
//!
//! This library provides:
//! - A store abstraction over the cluster API with an in-memory implementation
//! - The shared convergence pass (plan, apply, write status)
//! - Reconcilers for InferenceService, KVCachePool and LLMInferenceJob
//! - The kind registry, retry backoff, metrics and controller configuration

pub mod backoff;
pub mod children;
pub mod config;
pub mod convergence;
pub mod error;
pub mod metrics;
pub mod reconciler;
pub mod registry;
pub mod store;

pub use backoff::{BackoffPolicy, FailureTracker};
pub use config::{ConfigError, ControllerConfig, WorkloadSettings};
pub use convergence::{ChildAction, Outcome, Plan};
pub use error::{ReconcileError, Result};
pub use metrics::ReconcileMetrics;
pub use reconciler::{
    InferenceJobReconciler, InferenceServiceReconciler, KVCachePoolReconciler, Reconcile,
};
pub use registry::KindRegistry;
pub use store::{KubeStore, MemoryStore, ObjectKey, ObjectStore, StoreError, StoreObject};
