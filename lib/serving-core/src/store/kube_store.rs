//! ObjectStore backed by the Kubernetes API server

use super::{ObjectKey, ObjectStore, StoreError, StoreObject};
use async_trait::async_trait;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

/// Store that reads and writes through a [`kube::Client`]
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: StoreObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map API server rejections onto the store's error taxonomy
fn classify<K: StoreObject>(error: kube::Error, namespace: &str, name: &str) -> StoreError {
    match error {
        kube::Error::Api(response) => {
            let key = ObjectKey::of::<K>(namespace, name);
            match response.reason.as_str() {
                "AlreadyExists" => StoreError::AlreadyExists(key),
                "Conflict" => StoreError::Conflict(key),
                "NotFound" => StoreError::NotFound(key),
                _ => StoreError::Kube(kube::Error::Api(response)),
            }
        }
        other => StoreError::Kube(other),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| classify::<K>(e, namespace, name))
    }

    async fn create<K: StoreObject>(&self, namespace: &str, object: &K) -> Result<K, StoreError> {
        let name = object.meta().name.clone().unwrap_or_default();
        debug!(kind = %K::kind(&()), namespace, name = %name, "create");
        self.api::<K>(namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| classify::<K>(e, namespace, &name))
    }

    async fn patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError> {
        debug!(kind = %K::kind(&()), namespace, name, "patch");
        self.api::<K>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| classify::<K>(e, namespace, name))
    }

    async fn patch_status<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError> {
        debug!(kind = %K::kind(&()), namespace, name, "patch status");
        self.api::<K>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| classify::<K>(e, namespace, name))
    }
}
