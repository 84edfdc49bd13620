//! KVCachePool controller for reconciling KVCachePool resources

use crate::context::{error_policy, reconcile, scoped_api, Context};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::Client;
use kube_runtime::{watcher, Controller};
use serving_api::KVCachePool;
use serving_core::{KVCachePoolReconciler, KubeStore, ReconcileMetrics, WorkloadSettings};
use std::sync::Arc;
use tracing::{debug, error, info};

type Reconciler = KVCachePoolReconciler<KubeStore>;

pub struct KVCachePoolController {
    client: Client,
    namespace: Option<String>,
    context: Arc<Context<Reconciler>>,
}

impl KVCachePoolController {
    pub fn new(
        client: Client,
        namespace: Option<String>,
        settings: Arc<WorkloadSettings>,
        metrics: ReconcileMetrics,
    ) -> Self {
        let store = Arc::new(KubeStore::new(client.clone()));
        let reconciler = KVCachePoolReconciler::new(store, settings);
        Self {
            client,
            namespace,
            context: Arc::new(Context::new(reconciler, metrics)),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        info!("Starting KVCachePool reconciliation");

        let namespace = self.namespace.as_deref();
        let pools = scoped_api::<KVCachePool>(&self.client, namespace);

        let mut stream = Controller::new(pools, watcher::Config::default())
            .owns(scoped_api::<Deployment>(&self.client, namespace), watcher::Config::default())
            .owns(scoped_api::<Service>(&self.client, namespace), watcher::Config::default())
            .run(reconcile::<Reconciler>, error_policy::<Reconciler>, self.context.clone())
            .boxed();

        while let Some(item) = stream.next().await {
            match item {
                Ok((object, _)) => debug!("Reconciled KVCachePool {}", object.name),
                Err(e) => error!("Error in KVCachePool reconciliation stream: {}", e),
            }
        }

        Ok(())
    }
}
