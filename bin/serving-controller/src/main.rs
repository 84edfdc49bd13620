use anyhow::Result;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Api, Client};
use serving_core::{ControllerConfig, KindRegistry, ReconcileMetrics};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::init as tracing_init;

mod context;
mod health;
mod inference_job_controller;
mod inference_service_controller;
mod kv_cache_pool_controller;

use inference_job_controller::InferenceJobController;
use inference_service_controller::InferenceServiceController;
use kv_cache_pool_controller::KVCachePoolController;

#[tokio::main]
async fn main() -> Result<()> {
    let registry = KindRegistry::standard();

    // `serving-controller crd` prints the manifests to install
    if std::env::args().nth(1).as_deref() == Some("crd") {
        print!("{}", registry.crd_manifests()?);
        return Ok(());
    }

    tracing_init();

    info!("Starting serving-controller...");

    let config = ControllerConfig::from_env()?;
    info!(
        namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        kinds = ?registry.kinds(),
        "Controller configured"
    );

    let client = Client::try_default().await?;
    check_crds(&client, &registry).await;

    let metrics = ReconcileMetrics::new()?;
    let settings = Arc::new(config.workloads.clone());
    let namespace = config.watch_namespace.clone();

    let services = InferenceServiceController::new(
        client.clone(),
        namespace.clone(),
        settings.clone(),
        metrics.clone(),
    );
    let pools = KVCachePoolController::new(
        client.clone(),
        namespace.clone(),
        settings.clone(),
        metrics.clone(),
    );
    let jobs = InferenceJobController::new(client.clone(), namespace, settings, metrics.clone());

    tokio::spawn(async move {
        if let Err(e) = services.run().await {
            error!("InferenceService controller error: {}", e);
        }
    });
    tokio::spawn(async move {
        if let Err(e) = pools.run().await {
            error!("KVCachePool controller error: {}", e);
        }
    });
    tokio::spawn(async move {
        if let Err(e) = jobs.run().await {
            error!("LLMInferenceJob controller error: {}", e);
        }
    });

    let metrics_addr = config.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = health::serve(metrics_addr, metrics).await {
            error!("Health server error: {}", e);
        }
    });

    // Keep the process alive
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting...");

    Ok(())
}

/// Warn about registered kinds whose CRD is not installed; their controllers
/// would only log watch errors until it is
async fn check_crds(client: &Client, registry: &KindRegistry) {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    for registration in registry.iter() {
        match crds.get_opt(&registration.crd_name).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!(
                "CRD {} is not installed; apply the output of `serving-controller crd`",
                registration.crd_name
            ),
            Err(e) => warn!("Unable to check CRD {}: {}", registration.crd_name, e),
        }
    }
}
