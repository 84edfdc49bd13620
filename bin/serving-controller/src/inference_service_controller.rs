//! InferenceService controller for reconciling InferenceService resources

use crate::context::{error_policy, reconcile, scoped_api, Context};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::Client;
use kube_runtime::{watcher, Controller};
use serving_api::InferenceService;
use serving_core::{InferenceServiceReconciler, KubeStore, ReconcileMetrics, WorkloadSettings};
use std::sync::Arc;
use tracing::{debug, error, info};

type Reconciler = InferenceServiceReconciler<KubeStore>;

pub struct InferenceServiceController {
    client: Client,
    namespace: Option<String>,
    context: Arc<Context<Reconciler>>,
}

impl InferenceServiceController {
    pub fn new(
        client: Client,
        namespace: Option<String>,
        settings: Arc<WorkloadSettings>,
        metrics: ReconcileMetrics,
    ) -> Self {
        let store = Arc::new(KubeStore::new(client.clone()));
        let reconciler = InferenceServiceReconciler::new(store, settings);
        Self {
            client,
            namespace,
            context: Arc::new(Context::new(reconciler, metrics)),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        info!("Starting InferenceService reconciliation");

        let namespace = self.namespace.as_deref();
        let services = scoped_api::<InferenceService>(&self.client, namespace);
        let deployments = scoped_api::<Deployment>(&self.client, namespace);
        let endpoints = scoped_api::<Service>(&self.client, namespace);

        // Changes to owned routers and their Services trigger the owner
        let mut stream = Controller::new(services, watcher::Config::default())
            .owns(deployments, watcher::Config::default())
            .owns(endpoints, watcher::Config::default())
            .run(reconcile::<Reconciler>, error_policy::<Reconciler>, self.context.clone())
            .boxed();

        while let Some(item) = stream.next().await {
            match item {
                Ok((object, _)) => debug!("Reconciled InferenceService {}", object.name),
                Err(e) => error!("Error in InferenceService reconciliation stream: {}", e),
            }
        }

        Ok(())
    }
}
