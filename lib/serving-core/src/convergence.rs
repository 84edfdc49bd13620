//! The convergence pass shared by all reconcilers
//!
//! A reconciler loads the desired-state object and its children, computes a
//! [`Plan`] from what it loaded without touching the store, and then applies
//! the plan. Children are created when absent and otherwise only the fields
//! the reconciler owns are patched. Status is written only when it changed.

use crate::error::{ReconcileError, Result};
use crate::store::{ObjectStore, StoreError, StoreObject};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// Result of one convergence pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Children and status match the desired state
    Converged,
    /// The desired-state object no longer exists
    Deleted,
    /// A referenced object is not resolvable yet; try again after the delay
    RequeueAfter(Duration),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Converged => "converged",
            Outcome::Deleted => "deleted",
            Outcome::RequeueAfter(_) => "requeued",
        }
    }
}

/// A child resource to create
#[derive(Clone, Debug)]
pub enum Child {
    Deployment(Deployment),
    Service(Service),
    Job(Job),
}

impl Child {
    pub fn name(&self) -> String {
        match self {
            Child::Deployment(d) => d.name_any(),
            Child::Service(s) => s.name_any(),
            Child::Job(j) => j.name_any(),
        }
    }
}

/// Narrow update of a workload's replica count.
///
/// Renders to a merge patch that touches `spec.replicas` only, guarded by the
/// resourceVersion the drift was observed at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScalePatch {
    pub name: String,
    pub replicas: i32,
    pub resource_version: Option<String>,
}

impl ScalePatch {
    /// Patch `existing` to `replicas` if it is not already there
    pub fn for_drift(existing: &Deployment, replicas: i32) -> Option<Self> {
        let current = existing.spec.as_ref().and_then(|spec| spec.replicas);
        if current == Some(replicas) {
            return None;
        }
        Some(Self {
            name: existing.name_any(),
            replicas,
            resource_version: existing.resource_version(),
        })
    }

    pub fn to_merge_patch(&self) -> serde_json::Value {
        match &self.resource_version {
            Some(version) => json!({
                "metadata": { "resourceVersion": version },
                "spec": { "replicas": self.replicas },
            }),
            None => json!({ "spec": { "replicas": self.replicas } }),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ChildAction {
    Create(Child),
    Scale(ScalePatch),
}

/// Everything one pass intends to write
#[derive(Clone, Debug)]
pub struct Plan<S> {
    pub actions: Vec<ChildAction>,
    /// New status, present only when it differs from the loaded one
    pub status: Option<S>,
}

impl<S> Default for Plan<S> {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            status: None,
        }
    }
}

impl<S> Plan<S> {
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty() && self.status.is_none()
    }
}

/// Controller owner reference pointing back at `parent`
pub fn owner_reference<K: StoreObject>(parent: &K) -> Result<OwnerReference> {
    parent.controller_owner_ref(&()).ok_or_else(|| {
        ReconcileError::missing(format!("{} {}", K::kind(&()), parent.name_any()), "uid")
    })
}

/// Status to write when `observed` differs from `current`
pub fn status_change<S: PartialEq>(current: Option<&S>, observed: S) -> Option<S>
where
    S: Default,
{
    let unchanged = match current {
        Some(current) => *current == observed,
        None => observed == S::default(),
    };
    (!unchanged).then_some(observed)
}

/// Apply child actions in order. A create that loses a race to another pass
/// is treated as done; every other failure stops the pass.
pub async fn apply<S: ObjectStore>(store: &S, namespace: &str, actions: Vec<ChildAction>) -> Result<()> {
    for action in actions {
        match action {
            ChildAction::Create(child) => {
                let name = child.name();
                let created = match &child {
                    Child::Deployment(d) => store.create(namespace, d).await.map(|_| ()),
                    Child::Service(s) => store.create(namespace, s).await.map(|_| ()),
                    Child::Job(j) => store.create(namespace, j).await.map(|_| ()),
                };
                match created {
                    Ok(()) => info!(namespace, name = %name, "created child resource"),
                    Err(StoreError::AlreadyExists(key)) => {
                        debug!(%key, "child already exists, treating as created");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            ChildAction::Scale(patch) => {
                store
                    .patch::<Deployment>(namespace, &patch.name, &patch.to_merge_patch())
                    .await?;
                info!(
                    namespace,
                    name = %patch.name,
                    replicas = patch.replicas,
                    "updated workload replicas"
                );
            }
        }
    }
    Ok(())
}

/// Write `status` onto `parent`'s status subresource, conditioned on the
/// resourceVersion `parent` was loaded at
pub async fn write_status<S, K, T>(store: &S, namespace: &str, parent: &K, status: &T) -> Result<()>
where
    S: ObjectStore,
    K: StoreObject,
    T: Serialize + Sync,
{
    let name = parent.name_any();
    let mut patch = json!({ "status": serde_json::to_value(status)? });
    if let Some(version) = parent.resource_version() {
        patch["metadata"] = json!({ "resourceVersion": version });
    }
    store.patch_status::<K>(namespace, &name, &patch).await?;
    debug!(kind = %K::kind(&()), namespace, name = %name, "status updated");
    Ok(())
}

/// Apply a plan: child actions first, then the status write
pub async fn execute<S, K, T>(store: &S, namespace: &str, parent: &K, plan: Plan<T>) -> Result<()>
where
    S: ObjectStore,
    K: StoreObject,
    T: Serialize + Sync,
{
    apply(store, namespace, plan.actions).await?;
    if let Some(status) = &plan.status {
        write_status(store, namespace, parent, status).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use kube::api::ObjectMeta;

    fn deployment(name: &str, replicas: Option<i32>) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                resource_version: Some("7".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_scale_patch_only_on_drift() {
        assert_eq!(ScalePatch::for_drift(&deployment("d", Some(2)), 2), None);

        let patch = ScalePatch::for_drift(&deployment("d", Some(2)), 3).unwrap();
        assert_eq!(
            patch.to_merge_patch(),
            json!({ "metadata": { "resourceVersion": "7" }, "spec": { "replicas": 3 } })
        );

        // an unset replica count is drift as well
        assert!(ScalePatch::for_drift(&deployment("d", None), 1).is_some());
    }

    #[test]
    fn test_status_change() {
        assert_eq!(status_change::<i32>(None, 0), None);
        assert_eq!(status_change::<i32>(None, 2), Some(2));
        assert_eq!(status_change(Some(&2), 2), None);
        assert_eq!(status_change(Some(&2), 1), Some(1));
    }

    #[tokio::test]
    async fn test_create_losing_race_is_success() {
        let store = MemoryStore::new();
        store.insert(deployment("d", Some(1))).await.unwrap();

        let actions = vec![ChildAction::Create(Child::Deployment(deployment("d", Some(1))))];
        apply(&store, "ns", actions).await.unwrap();
        assert_eq!(store.count::<Deployment>("ns").await, 1);
    }

    #[tokio::test]
    async fn test_scale_conflict_propagates() {
        let store = MemoryStore::new();
        store.insert(deployment("d", Some(1))).await.unwrap();

        // patch computed against a version the store has already moved past
        let stale = ScalePatch {
            name: "d".to_string(),
            replicas: 4,
            resource_version: Some("0".to_string()),
        };
        let result = apply(&store, "ns", vec![ChildAction::Scale(stale)]).await;
        assert!(matches!(
            result,
            Err(ReconcileError::Store(StoreError::Conflict(_)))
        ));
    }

    #[tokio::test]
    async fn test_write_failure_propagates() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let actions = vec![ChildAction::Create(Child::Deployment(deployment("d", Some(1))))];
        assert!(apply(&store, "ns", actions).await.is_err());
    }
}
