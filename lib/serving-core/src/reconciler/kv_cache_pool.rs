//! KVCachePool reconciler: a cache Deployment plus a headless Service so
//! routers can reach every cache replica directly

use super::{child_name, Reconcile};
use crate::children::{Endpoint, Workload};
use crate::config::WorkloadSettings;
use crate::convergence::{self, owner_reference, status_change, Child, ChildAction, Outcome, Plan, ScalePatch};
use crate::error::Result;
use crate::store::ObjectStore;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use serving_api::{KVCachePool, KVCachePoolStatus};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Suffix shared by the cache Deployment and its headless Service
pub const CACHE_SUFFIX: &str = "-cache";
/// Port the cache process listens on
pub const CACHE_PORT: i32 = 6379;

pub struct KVCachePoolReconciler<S> {
    store: Arc<S>,
    settings: Arc<WorkloadSettings>,
}

impl<S: ObjectStore> KVCachePoolReconciler<S> {
    pub fn new(store: Arc<S>, settings: Arc<WorkloadSettings>) -> Self {
        Self { store, settings }
    }

    /// Compute the actions that move the pool's children and status towards
    /// its spec. Each child role converges independently of the other.
    pub fn plan(
        &self,
        pool: &KVCachePool,
        deployment: Option<&Deployment>,
        headless: Option<&Service>,
    ) -> Result<Plan<KVCachePoolStatus>> {
        let name = child_name(&pool.name_any(), CACHE_SUFFIX);
        let namespace = pool.namespace().unwrap_or_default();
        let replicas = pool.spec.desired_replicas();
        let mut plan = Plan::default();

        match deployment {
            None => {
                let owner = owner_reference(pool)?;
                let workload = Workload {
                    name: &name,
                    namespace: &namespace,
                    owner: &owner,
                    replicas,
                    container: "cache",
                    image: &self.settings.cache_image,
                    port_name: "redis",
                    port: CACHE_PORT,
                    env: vec![
                        ("KVCACHE_STRATEGY", pool.spec.strategy.clone()),
                        ("KVCACHE_TOTAL_MEMORY_GB", pool.spec.total_memory_gb.to_string()),
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

        if headless.is_none() {
            let owner = owner_reference(pool)?;
            let endpoint = Endpoint {
                name: &name,
                namespace: &namespace,
                owner: &owner,
                app: &name,
                port_name: "redis",
                port: CACHE_PORT,
                target_port: CACHE_PORT,
                headless: true,
            };
            plan.actions.push(ChildAction::Create(Child::Service(endpoint.build())));
        }

        let ready = deployment
            .and_then(|d| d.status.as_ref())
            .and_then(|status| status.ready_replicas)
            .unwrap_or(0);
        plan.status = status_change(
            pool.status.as_ref(),
            KVCachePoolStatus {
                ready_replicas: ready,
            },
        );

        Ok(plan)
    }
}

#[async_trait]
impl<S: ObjectStore + 'static> Reconcile for KVCachePoolReconciler<S> {
    type Object = KVCachePool;

    #[instrument(skip(self), fields(kind = "KVCachePool"))]
    async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome> {
        let Some(pool) = self.store.get::<KVCachePool>(namespace, name).await? else {
            debug!("KVCachePool is gone, nothing to do");
            return Ok(Outcome::Deleted);
        };

        let child = child_name(name, CACHE_SUFFIX);
        let deployment = self.store.get::<Deployment>(namespace, &child).await?;
        let headless = self.store.get::<Service>(namespace, &child).await?;

        let plan = self.plan(&pool, deployment.as_ref(), headless.as_ref())?;
        if plan.is_noop() {
            debug!("KVCachePool already converged");
            return Ok(Outcome::Converged);
        }
        if let Some(status) = &plan.status {
            info!(ready_replicas = status.ready_replicas, "KVCachePool status changed");
        }
        convergence::execute(&*self.store, namespace, &pool, plan).await?;
        Ok(Outcome::Converged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::children::container_env;
    use crate::store::MemoryStore;
    use serde_json::json;
    use serving_api::KVCachePoolSpec;

    fn settings() -> Arc<WorkloadSettings> {
        Arc::new(WorkloadSettings::default())
    }

    async fn seed_pool(store: &MemoryStore, name: &str, replicas: i32) -> KVCachePool {
        let mut pool = KVCachePool::new(
            name,
            KVCachePoolSpec {
                total_memory_gb: 32,
                replicas: Some(replicas),
                strategy: "lfu".to_string(),
            },
        );
        pool.metadata.namespace = Some("ns".to_string());
        store.insert(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_creates_deployment_and_headless_service() {
        let store = Arc::new(MemoryStore::new());
        seed_pool(&store, "pool-a", 3).await;
        let reconciler = KVCachePoolReconciler::new(store.clone(), settings());

        let outcome = reconciler.reconcile("ns", "pool-a").await.unwrap();
        assert_eq!(outcome, Outcome::Converged);

        let deployment: Deployment = store.get("ns", "pool-a-cache").await.unwrap().unwrap();
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(container_env(&spec.template, "KVCACHE_STRATEGY"), Some("lfu"));
        assert_eq!(container_env(&spec.template, "KVCACHE_TOTAL_MEMORY_GB"), Some("32"));

        let service: Service = store.get("ns", "pool-a-cache").await.unwrap().unwrap();
        let service_spec = service.spec.unwrap();
        assert_eq!(service_spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(service_spec.ports.unwrap()[0].port, CACHE_PORT);
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        seed_pool(&store, "pool-a", 2).await;
        let reconciler = KVCachePoolReconciler::new(store.clone(), settings());

        reconciler.reconcile("ns", "pool-a").await.unwrap();
        let writes = store.writes();
        reconciler.reconcile("ns", "pool-a").await.unwrap();
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn test_missing_headless_service_is_recreated_alone() {
        let store = Arc::new(MemoryStore::new());
        let pool = seed_pool(&store, "pool-a", 1).await;
        let reconciler = KVCachePoolReconciler::new(store.clone(), settings());

        // deployment exists already, service does not
        let plan = reconciler.plan(&pool, None, None).unwrap();
        if let Some(ChildAction::Create(Child::Deployment(d))) = plan.actions.first() {
            store.insert(d.clone()).await.unwrap();
        }
        reconciler.reconcile("ns", "pool-a").await.unwrap();

        assert_eq!(store.count::<Deployment>("ns").await, 1);
        assert_eq!(store.count::<Service>("ns").await, 1);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_replica_drift_patches_only_replicas() {
        let store = Arc::new(MemoryStore::new());
        seed_pool(&store, "pool-a", 2).await;
        let reconciler = KVCachePoolReconciler::new(store.clone(), settings());
        reconciler.reconcile("ns", "pool-a").await.unwrap();

        // another actor annotates the deployment; the pool is scaled to 4
        let mut deployment: Deployment = store.get("ns", "pool-a-cache").await.unwrap().unwrap();
        deployment
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert("team".to_string(), "cache".to_string());
        store.insert(deployment).await.unwrap();
        let mut pool: KVCachePool = store.get("ns", "pool-a").await.unwrap().unwrap();
        pool.spec.replicas = Some(4);
        store.insert(pool).await.unwrap();

        reconciler.reconcile("ns", "pool-a").await.unwrap();

        let deployment: Deployment = store.get("ns", "pool-a-cache").await.unwrap().unwrap();
        assert_eq!(deployment.spec.unwrap().replicas, Some(4));
        assert_eq!(
            deployment.metadata.annotations.unwrap().get("team").map(String::as_str),
            Some("cache")
        );
    }

    #[tokio::test]
    async fn test_ready_replicas_mirrored_once() {
        let store = Arc::new(MemoryStore::new());
        seed_pool(&store, "pool-a", 2).await;
        let reconciler = KVCachePoolReconciler::new(store.clone(), settings());
        reconciler.reconcile("ns", "pool-a").await.unwrap();

        store
            .set_status::<Deployment>("ns", "pool-a-cache", json!({ "readyReplicas": 2 }))
            .await
            .unwrap();
        reconciler.reconcile("ns", "pool-a").await.unwrap();
        let pool: KVCachePool = store.get("ns", "pool-a").await.unwrap().unwrap();
        assert_eq!(pool.status.unwrap().ready_replicas, 2);

        let writes = store.writes();
        reconciler.reconcile("ns", "pool-a").await.unwrap();
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn test_deleted_pool() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = KVCachePoolReconciler::new(store.clone(), settings());
        assert_eq!(reconciler.reconcile("ns", "gone").await.unwrap(), Outcome::Deleted);
        assert_eq!(store.writes(), 0);
    }
}
