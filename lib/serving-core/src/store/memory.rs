//! In-process ObjectStore
//!
//! Behaves like the API server where reconcilers can observe it: identities
//! are unique, every write bumps a resourceVersion, version-checked patches
//! fail with Conflict, and the status subresource is patched separately from
//! the main resource. Writes made through [`ObjectStore`] are counted; the
//! seeding helpers (`insert`, `set_status`) stand in for other actors and are
//! not.

use super::{ObjectKey, ObjectStore, StoreError, StoreObject};
use async_trait::async_trait;
use kube::core::ErrorResponse;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<ObjectKey, Value>>,
    version: AtomicU64,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes issued through the [`ObjectStore`] interface
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent create/patch fail with an internal API error
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Insert or replace an object as an outside actor would
    pub async fn insert<K: StoreObject>(&self, object: K) -> Result<K, StoreError> {
        let meta = object.meta();
        let key = ObjectKey::of::<K>(
            meta.namespace.as_deref().unwrap_or("default"),
            meta.name.as_deref().unwrap_or_default(),
        );
        let mut value = serde_json::to_value(&object)?;
        self.stamp(&key, &mut value);
        self.objects.write().await.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    /// Merge `status` into a stored object as the platform would
    pub async fn set_status<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        status: Value,
    ) -> Result<K, StoreError> {
        let key = ObjectKey::of::<K>(namespace, name);
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        merge(field_mut(stored, "status"), &status);
        self.bump(stored);
        Ok(serde_json::from_value(stored.clone())?)
    }

    /// Number of objects of kind `K` stored in `namespace`
    pub async fn count<K: StoreObject>(&self, namespace: &str) -> usize {
        let kind = K::kind(&());
        self.objects
            .read()
            .await
            .keys()
            .filter(|key| key.kind == kind && key.namespace == namespace)
            .count()
    }

    fn stamp(&self, key: &ObjectKey, value: &mut Value) {
        let metadata = field_mut(value, "metadata");
        if let Value::Object(meta) = metadata {
            meta.insert("name".to_string(), Value::String(key.name.clone()));
            meta.insert("namespace".to_string(), Value::String(key.namespace.clone()));
            meta.entry("uid")
                .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        }
        self.bump(value);
    }

    fn bump(&self, value: &mut Value) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        if let Value::Object(meta) = field_mut(value, "metadata") {
            meta.insert(
                "resourceVersion".to_string(),
                Value::String(version.to_string()),
            );
        }
    }

    fn record_write(&self) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Kube(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "injected write failure".to_string(),
                reason: "InternalError".to_string(),
                code: 500,
            })));
        }
        Ok(())
    }

    async fn apply_patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        subresource: Subresource,
    ) -> Result<K, StoreError> {
        self.record_write()?;
        let key = ObjectKey::of::<K>(namespace, name);
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if let Some(expected) = patch
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
        {
            let current = stored
                .pointer("/metadata/resourceVersion")
                .and_then(Value::as_str);
            if current != Some(expected) {
                return Err(StoreError::Conflict(key));
            }
        }

        if let Value::Object(fields) = patch {
            for (field, value) in fields {
                let in_scope = match subresource {
                    Subresource::Main => field != "status",
                    Subresource::Status => field == "status",
                };
                if in_scope {
                    merge(field_mut(stored, field), value);
                }
            }
        }
        self.bump(stored);
        Ok(serde_json::from_value(stored.clone())?)
    }
}

#[derive(Clone, Copy)]
enum Subresource {
    Main,
    Status,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        let key = ObjectKey::of::<K>(namespace, name);
        match self.objects.read().await.get(&key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn create<K: StoreObject>(&self, namespace: &str, object: &K) -> Result<K, StoreError> {
        self.record_write()?;
        let key = ObjectKey::of::<K>(namespace, object.meta().name.as_deref().unwrap_or_default());
        let mut value = serde_json::to_value(object)?;
        if let Value::Object(fields) = &mut value {
            fields.remove("status");
        }

        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        self.stamp(&key, &mut value);
        objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K, StoreError> {
        self.apply_patch(namespace, name, patch, Subresource::Main).await
    }

    async fn patch_status<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K, StoreError> {
        self.apply_patch(namespace, name, patch, Subresource::Status).await
    }
}

/// Field `name` of a JSON object, turning `value` into an object if needed
fn field_mut<'a>(value: &'a mut Value, name: &str) -> &'a mut Value {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    &mut value[name]
}

/// RFC 7386 JSON merge patch
fn merge(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(fields) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(existing) = target {
                for (key, value) in fields {
                    if value.is_null() {
                        existing.remove(key);
                    } else {
                        merge(existing.entry(key.as_str()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}
