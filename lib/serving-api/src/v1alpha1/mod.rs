/// API version v1alpha1 for model serving CRDs

pub mod inference_service;
pub mod kv_cache_pool;
pub mod inference_job;

pub use inference_service::{InferenceService, InferenceServiceSpec, InferenceServiceStatus};
pub use kv_cache_pool::{KVCachePool, KVCachePoolSpec, KVCachePoolStatus};
pub use inference_job::{LLMInferenceJob, LLMInferenceJobSpec, LLMInferenceJobStatus};

/// API group for model serving resources
pub const API_GROUP: &str = "llm.example.com";
/// API version for model serving resources
pub const API_VERSION: &str = "v1alpha1";
