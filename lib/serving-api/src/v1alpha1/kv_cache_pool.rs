use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// KVCachePool declares a pool of key-value cache replicas that routers
/// address individually through a headless Service
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "llm.example.com",
    version = "v1alpha1",
    kind = "KVCachePool",
    plural = "kvcachepools",
    shortname = "kvpool",
    namespaced,
    status = "KVCachePoolStatus",
    printcolumn = r#"{"name":"Strategy","type":"string","jsonPath":".spec.strategy"}"#,
    printcolumn = r#"{"name":"Memory","type":"integer","jsonPath":".spec.totalMemoryGB"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
)]
pub struct KVCachePoolSpec {
    /// Total memory in GB intended for the cache across all replicas
    #[serde(rename = "totalMemoryGB")]
    pub total_memory_gb: i32,

    /// Number of cache replicas (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Cache strategy label, e.g. "lru", "lfu", "rr". Passed through to the
    /// cache process as-is.
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

impl KVCachePoolSpec {
    /// Replica count with the default applied
    pub fn desired_replicas(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }
}

impl Default for KVCachePoolSpec {
    fn default() -> Self {
        Self {
            total_memory_gb: 0,
            replicas: None,
            strategy: default_strategy(),
        }
    }
}

/// Status of a KVCachePool
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KVCachePoolStatus {
    /// Cache replicas reported ready by the cache Deployment
    #[serde(default)]
    pub ready_replicas: i32,
}

fn default_strategy() -> String {
    "lru".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_memory_field_name() {
        let spec: KVCachePoolSpec =
            serde_json::from_value(serde_json::json!({ "totalMemoryGB": 16 })).unwrap();
        assert_eq!(spec.total_memory_gb, 16);
        assert_eq!(spec.strategy, "lru");
        assert_eq!(spec.desired_replicas(), 1);

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["totalMemoryGB"], 16);
    }
}
