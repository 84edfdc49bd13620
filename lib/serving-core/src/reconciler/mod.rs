//! Reconcilers, one per desired-state kind

mod inference_job;
mod inference_service;
mod kv_cache_pool;

pub use inference_job::{InferenceJobReconciler, JobPhase, PLACEHOLDER_OUTPUT};
pub use inference_service::{cache_endpoint, InferenceServiceReconciler};
pub use kv_cache_pool::{KVCachePoolReconciler, CACHE_PORT};

use crate::convergence::Outcome;
use crate::error::Result;
use crate::store::StoreObject;
use async_trait::async_trait;

/// One convergence pass for the object identified by `namespace`/`name`.
///
/// The object is always loaded fresh from the store; callers pass identity
/// only. Implementations hold no per-object state, so passes for different
/// objects may run concurrently.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    type Object: StoreObject;

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome>;
}

/// Deterministic name of a child: the owner's name plus a role suffix
pub fn child_name(owner: &str, suffix: &str) -> String {
    format!("{}{}", owner, suffix)
}
