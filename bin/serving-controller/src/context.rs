//! Glue between kube-runtime controllers and the core reconcilers

use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::Action;
use k8s_openapi::NamespaceResourceScope;
use serde::de::DeserializeOwned;
use serving_core::{FailureTracker, Outcome, Reconcile, ReconcileError, ReconcileMetrics};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Shared state handed to every reconcile call of one controller
pub struct Context<R> {
    pub reconciler: R,
    pub metrics: ReconcileMetrics,
    pub failures: FailureTracker,
}

impl<R> Context<R> {
    pub fn new(reconciler: R, metrics: ReconcileMetrics) -> Self {
        Self {
            reconciler,
            metrics,
            failures: FailureTracker::default(),
        }
    }
}

fn object_key<K: Resource<DynamicType = ()>>(object: &K) -> String {
    format!(
        "{}/{}/{}",
        K::kind(&()),
        object.namespace().unwrap_or_default(),
        object.name_any()
    )
}

fn action(outcome: Outcome) -> Action {
    match outcome {
        Outcome::Converged | Outcome::Deleted => Action::await_change(),
        Outcome::RequeueAfter(delay) => Action::requeue(delay),
    }
}

/// Run one pass for the object behind a change notification. Only the
/// identity of `object` is used; the reconciler reloads it from the store.
pub async fn reconcile<R: Reconcile>(
    object: Arc<R::Object>,
    ctx: Arc<Context<R>>,
) -> Result<Action, ReconcileError> {
    let kind = <R::Object as Resource>::kind(&());
    let namespace = object.namespace().unwrap_or_default();
    let name = object.name_any();
    let started = Instant::now();

    match ctx.reconciler.reconcile(&namespace, &name).await {
        Ok(outcome) => {
            ctx.failures.reset(&object_key(object.as_ref()));
            ctx.metrics.observe(&kind, outcome.label(), started.elapsed());
            debug!(%kind, %namespace, %name, outcome = outcome.label(), "reconciled");
            Ok(action(outcome))
        }
        Err(e) => {
            ctx.metrics.observe(&kind, "error", started.elapsed());
            Err(e)
        }
    }
}

/// Requeue a failed pass with per-object exponential backoff
pub fn error_policy<R: Reconcile>(
    object: Arc<R::Object>,
    error: &ReconcileError,
    ctx: Arc<Context<R>>,
) -> Action {
    let key = object_key(object.as_ref());
    let delay = ctx.failures.record_failure(&key);
    error!(
        object = %key,
        %error,
        attempt = ctx.failures.failures(&key),
        "Reconciliation failed, requeue in {:?}",
        delay
    );
    Action::requeue(delay)
}

/// Api over one namespace, or over all namespaces when none is given
pub fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}
