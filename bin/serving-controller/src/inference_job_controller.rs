//! LLMInferenceJob controller for reconciling LLMInferenceJob resources

use crate::context::{error_policy, reconcile, scoped_api, Context};
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::Client;
use kube_runtime::{watcher, Controller};
use serving_api::LLMInferenceJob;
use serving_core::{InferenceJobReconciler, KubeStore, ReconcileMetrics, WorkloadSettings};
use std::sync::Arc;
use tracing::{debug, error, info};

type Reconciler = InferenceJobReconciler<KubeStore>;

pub struct InferenceJobController {
    client: Client,
    namespace: Option<String>,
    context: Arc<Context<Reconciler>>,
}

impl InferenceJobController {
    pub fn new(
        client: Client,
        namespace: Option<String>,
        settings: Arc<WorkloadSettings>,
        metrics: ReconcileMetrics,
    ) -> Self {
        let store = Arc::new(KubeStore::new(client.clone()));
        let reconciler = InferenceJobReconciler::new(store, settings);
        Self {
            client,
            namespace,
            context: Arc::new(Context::new(reconciler, metrics)),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        info!("Starting LLMInferenceJob reconciliation");

        let namespace = self.namespace.as_deref();
        let jobs = scoped_api::<LLMInferenceJob>(&self.client, namespace);

        // Watching the runner Jobs is what surfaces their completion
        let mut stream = Controller::new(jobs, watcher::Config::default())
            .owns(scoped_api::<Job>(&self.client, namespace), watcher::Config::default())
            .run(reconcile::<Reconciler>, error_policy::<Reconciler>, self.context.clone())
            .boxed();

        while let Some(item) = stream.next().await {
            match item {
                Ok((object, _)) => debug!("Reconciled LLMInferenceJob {}", object.name),
                Err(e) => error!("Error in LLMInferenceJob reconciliation stream: {}", e),
            }
        }

        Ok(())
    }
}
