use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// InferenceService declares a routing tier for one model: a set of router
/// replicas, the concurrency each replica admits, and optionally the
/// KVCachePool the routers should address
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "llm.example.com",
    version = "v1alpha1",
    kind = "InferenceService",
    plural = "inferenceservices",
    shortname = "isvc",
    namespaced,
    status = "InferenceServiceStatus",
    printcolumn = r#"{"name":"Model","type":"string","jsonPath":".spec.modelRef"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Available","type":"integer","jsonPath":".status.availableReplicas"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct InferenceServiceSpec {
    /// Logical name of the model the routers serve
    pub model_ref: String,

    /// Number of router replicas (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Maximum number of requests each router admits concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: i32,

    /// Name of a KVCachePool in the same namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_pool_ref: Option<String>,
}

impl InferenceServiceSpec {
    /// Replica count with the default applied
    pub fn desired_replicas(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }

    /// Referenced cache pool, ignoring an empty reference
    pub fn cache_pool(&self) -> Option<&str> {
        self.cache_pool_ref.as_deref().filter(|name| !name.is_empty())
    }
}

impl Default for InferenceServiceSpec {
    fn default() -> Self {
        Self {
            model_ref: String::new(),
            replicas: None,
            max_concurrency: default_max_concurrency(),
            cache_pool_ref: None,
        }
    }
}

/// Status of an InferenceService
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InferenceServiceStatus {
    /// Router replicas reported available by the router Deployment
    #[serde(default)]
    pub available_replicas: i32,
}

fn default_max_concurrency() -> i32 {
    4
}
