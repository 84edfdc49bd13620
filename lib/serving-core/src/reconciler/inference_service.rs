//! InferenceService reconciler: the router Deployment and the Service in
//! front of it, wired to the referenced KVCachePool if there is one

use super::kv_cache_pool::CACHE_SUFFIX;
use super::{child_name, Reconcile, CACHE_PORT};
use crate::children::{Endpoint, Workload};
use crate::config::WorkloadSettings;
use crate::convergence::{self, owner_reference, status_change, Child, ChildAction, Outcome, Plan, ScalePatch};
use crate::error::Result;
use crate::store::ObjectStore;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use serving_api::{InferenceService, InferenceServiceStatus, KVCachePool};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const ROUTER_SUFFIX: &str = "-router";
const ROUTER_CONTAINER_PORT: i32 = 5678;
const ROUTER_SERVICE_PORT: i32 = 80;

/// Address of a pool's headless cache Service, resolving to every cache pod
pub fn cache_endpoint(pool: &KVCachePool) -> String {
    format!(
        "{}.{}.svc.cluster.local:{}",
        child_name(&pool.name_any(), CACHE_SUFFIX),
        pool.namespace().unwrap_or_default(),
        CACHE_PORT
    )
}

pub struct InferenceServiceReconciler<S> {
    store: Arc<S>,
    settings: Arc<WorkloadSettings>,
}

impl<S: ObjectStore> InferenceServiceReconciler<S> {
    pub fn new(store: Arc<S>, settings: Arc<WorkloadSettings>) -> Self {
        Self { store, settings }
    }

    /// Compute the actions for one service given the already resolved cache
    /// pool, the router Deployment and the router Service as loaded.
    pub fn plan(
        &self,
        service: &InferenceService,
        pool: Option<&KVCachePool>,
        deployment: Option<&Deployment>,
        endpoint: Option<&Service>,
    ) -> Result<Plan<InferenceServiceStatus>> {
        let name = service.name_any();
        let namespace = service.namespace().unwrap_or_default();
        let deployment_name = child_name(&name, ROUTER_SUFFIX);
        let replicas = service.spec.desired_replicas();
        let mut plan = Plan::default();

        match deployment {
            None => {
                let owner = owner_reference(service)?;
                let kv_endpoints: Vec<String> = pool.map(cache_endpoint).into_iter().collect();
                let workload = Workload {
                    name: &deployment_name,
                    namespace: &namespace,
                    owner: &owner,
                    replicas,
                    container: "router",
                    image: &self.settings.router_image,
                    port_name: "http",
                    port: ROUTER_CONTAINER_PORT,
                    env: vec![
                        ("MODEL_REF", service.spec.model_ref.clone()),
                        ("MAX_CONCURRENCY", service.spec.max_concurrency.to_string()),
                        ("KV_ENDPOINTS", kv_endpoints.join(",")),
                    ],
                };
                plan.actions.push(ChildAction::Create(Child::Deployment(workload.build())));
            }
            Some(existing) => {
                if let Some(patch) = ScalePatch::for_drift(existing, replicas) {
                    plan.actions.push(ChildAction::Scale(patch));
                }
            }
        }

        if endpoint.is_none() {
            let owner = owner_reference(service)?;
            let endpoint = Endpoint {
                name: &name,
                namespace: &namespace,
                owner: &owner,
                app: &deployment_name,
                port_name: "http",
                port: ROUTER_SERVICE_PORT,
                target_port: ROUTER_CONTAINER_PORT,
                headless: false,
            };
            plan.actions.push(ChildAction::Create(Child::Service(endpoint.build())));
        }

        let available = deployment
            .and_then(|d| d.status.as_ref())
            .and_then(|status| status.available_replicas)
            .unwrap_or(0);
        plan.status = status_change(
            service.status.as_ref(),
            InferenceServiceStatus {
                available_replicas: available,
            },
        );

        Ok(plan)
    }
}

#[async_trait]
impl<S: ObjectStore + 'static> Reconcile for InferenceServiceReconciler<S> {
    type Object = InferenceService;

    #[instrument(skip(self), fields(kind = "InferenceService"))]
    async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome> {
        let Some(service) = self.store.get::<InferenceService>(namespace, name).await? else {
            debug!("InferenceService is gone, nothing to do");
            return Ok(Outcome::Deleted);
        };

        // The pool is looked up on every pass and never owned. Until it can
        // be resolved nothing is written and the pass is retried later.
        let pool = match service.spec.cache_pool() {
            None => None,
            Some(pool_name) => match self.store.get::<KVCachePool>(namespace, pool_name).await {
                Ok(Some(pool)) => Some(pool),
                Ok(None) => {
                    warn!(cache_pool = pool_name, "referenced KVCachePool not found, requeueing");
                    return Ok(Outcome::RequeueAfter(self.settings.dependency_requeue));
                }
                Err(error) => {
                    warn!(cache_pool = pool_name, %error, "failed to load referenced KVCachePool, requeueing");
                    return Ok(Outcome::RequeueAfter(self.settings.dependency_requeue));
                }
            },
        };

        let deployment = self
            .store
            .get::<Deployment>(namespace, &child_name(name, ROUTER_SUFFIX))
            .await?;
        let endpoint = self.store.get::<Service>(namespace, name).await?;

        let plan = self.plan(&service, pool.as_ref(), deployment.as_ref(), endpoint.as_ref())?;
        if plan.is_noop() {
            debug!("InferenceService already converged");
            return Ok(Outcome::Converged);
        }
        if let Some(status) = &plan.status {
            info!(available_replicas = status.available_replicas, "InferenceService status changed");
        }
        convergence::execute(&*self.store, namespace, &service, plan).await?;
        Ok(Outcome::Converged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::children::container_env;
    use crate::reconciler::KVCachePoolReconciler;
    use crate::store::MemoryStore;
    use serde_json::json;
    use serving_api::{InferenceServiceSpec, KVCachePoolSpec};
    use std::time::Duration;

    fn settings() -> Arc<WorkloadSettings> {
        Arc::new(WorkloadSettings::default())
    }

    async fn seed_service(store: &MemoryStore, name: &str, pool: Option<&str>) -> InferenceService {
        let mut service = InferenceService::new(
            name,
            InferenceServiceSpec {
                model_ref: "m1".to_string(),
                replicas: Some(2),
                max_concurrency: 8,
                cache_pool_ref: pool.map(str::to_string),
            },
        );
        service.metadata.namespace = Some("ns".to_string());
        store.insert(service).await.unwrap()
    }

    async fn seed_pool(store: &MemoryStore, name: &str) -> KVCachePool {
        let mut pool = KVCachePool::new(name, KVCachePoolSpec::default());
        pool.metadata.namespace = Some("ns".to_string());
        store.insert(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_with_cache_pool() {
        let store = Arc::new(MemoryStore::new());
        seed_pool(&store, "pool-a").await;
        seed_service(&store, "svc", Some("pool-a")).await;
        let reconciler = InferenceServiceReconciler::new(store.clone(), settings());

        assert_eq!(reconciler.reconcile("ns", "svc").await.unwrap(), Outcome::Converged);

        let deployment: Deployment = store.get("ns", "svc-router").await.unwrap().unwrap();
        let owners = deployment.metadata.owner_references.clone().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "InferenceService");
        assert_eq!(owners[0].controller, Some(true));

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(container_env(&spec.template, "MODEL_REF"), Some("m1"));
        assert_eq!(container_env(&spec.template, "MAX_CONCURRENCY"), Some("8"));
        assert_eq!(
            container_env(&spec.template, "KV_ENDPOINTS"),
            Some("pool-a-cache.ns.svc.cluster.local:6379")
        );

        let endpoint: Service = store.get("ns", "svc").await.unwrap().unwrap();
        let ports = endpoint.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].port, 80);

        // the platform reports both routers available
        store
            .set_status::<Deployment>("ns", "svc-router", json!({ "availableReplicas": 2 }))
            .await
            .unwrap();
        reconciler.reconcile("ns", "svc").await.unwrap();
        let service: InferenceService = store.get("ns", "svc").await.unwrap().unwrap();
        assert_eq!(service.status.unwrap().available_replicas, 2);
    }

    #[tokio::test]
    async fn test_without_cache_pool_endpoints_are_empty() {
        let store = Arc::new(MemoryStore::new());
        seed_service(&store, "svc", None).await;
        let reconciler = InferenceServiceReconciler::new(store.clone(), settings());
        reconciler.reconcile("ns", "svc").await.unwrap();

        let deployment: Deployment = store.get("ns", "svc-router").await.unwrap().unwrap();
        assert_eq!(container_env(&deployment.spec.unwrap().template, "KV_ENDPOINTS"), Some(""));
    }

    #[tokio::test]
    async fn test_missing_cache_pool_requeues_without_writes() {
        let store = Arc::new(MemoryStore::new());
        seed_service(&store, "svc", Some("pool-a")).await;
        let reconciler = InferenceServiceReconciler::new(store.clone(), settings());

        let outcome = reconciler.reconcile("ns", "svc").await.unwrap();
        assert_eq!(outcome, Outcome::RequeueAfter(Duration::from_secs(5)));
        assert_eq!(store.writes(), 0);
        assert_eq!(store.count::<Deployment>("ns").await, 0);
        assert_eq!(store.count::<Service>("ns").await, 0);
        let service: InferenceService = store.get("ns", "svc").await.unwrap().unwrap();
        assert!(service.status.is_none());
    }

    #[tokio::test]
    async fn test_service_and_pool_converge_in_either_order() {
        let store = Arc::new(MemoryStore::new());
        seed_service(&store, "svc", Some("pool-a")).await;
        seed_pool(&store, "pool-a").await;
        let services = InferenceServiceReconciler::new(store.clone(), settings());
        let pools = KVCachePoolReconciler::new(store.clone(), settings());

        // the two kinds converge independently and in either order
        services.reconcile("ns", "svc").await.unwrap();
        pools.reconcile("ns", "pool-a").await.unwrap();

        assert!(store.get::<Deployment>("ns", "svc-router").await.unwrap().is_some());
        assert!(store.get::<Deployment>("ns", "pool-a-cache").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_idempotent_and_deterministic_names() {
        let store = Arc::new(MemoryStore::new());
        seed_service(&store, "svc", None).await;
        let reconciler = InferenceServiceReconciler::new(store.clone(), settings());

        reconciler.reconcile("ns", "svc").await.unwrap();
        let writes = store.writes();
        reconciler.reconcile("ns", "svc").await.unwrap();

        assert_eq!(store.writes(), writes);
        assert_eq!(store.count::<Deployment>("ns").await, 1);
        assert_eq!(store.count::<Service>("ns").await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_notifications() {
        let store = Arc::new(MemoryStore::new());
        seed_service(&store, "svc", None).await;
        let reconciler = Arc::new(InferenceServiceReconciler::new(store.clone(), settings()));

        let passes: Vec<_> = (0..8)
            .map(|_| {
                let reconciler = reconciler.clone();
                tokio::spawn(async move { reconciler.reconcile("ns", "svc").await })
            })
            .collect();
        for pass in passes {
            pass.await.unwrap().unwrap();
        }

        assert_eq!(store.count::<Deployment>("ns").await, 1);
        assert_eq!(store.count::<Service>("ns").await, 1);
    }

    #[tokio::test]
    async fn test_stale_plan_loses_create_race() {
        let store = Arc::new(MemoryStore::new());
        let service = seed_service(&store, "svc", None).await;
        let reconciler = InferenceServiceReconciler::new(store.clone(), settings());

        // plan computed before another pass created the children
        let stale = reconciler.plan(&service, None, None, None).unwrap();
        reconciler.reconcile("ns", "svc").await.unwrap();
        convergence::apply(&*store, "ns", stale.actions).await.unwrap();

        assert_eq!(store.count::<Deployment>("ns").await, 1);
        assert_eq!(store.count::<Service>("ns").await, 1);
    }

    #[tokio::test]
    async fn test_status_write_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        seed_service(&store, "svc", None).await;
        let reconciler = InferenceServiceReconciler::new(store.clone(), settings());
        reconciler.reconcile("ns", "svc").await.unwrap();
        store
            .set_status::<Deployment>("ns", "svc-router", json!({ "availableReplicas": 1 }))
            .await
            .unwrap();

        store.fail_writes(true);
        assert!(reconciler.reconcile("ns", "svc").await.is_err());
        let service: InferenceService = store.get("ns", "svc").await.unwrap().unwrap();
        assert!(service.status.is_none());
    }
}
