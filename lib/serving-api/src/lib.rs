//! Model serving API types and CRDs for Kubernetes integration
//!
//! This library defines the custom resources driven by the serving controller:
//! - InferenceService: a routing tier of router replicas in front of a model
//! - KVCachePool: a pool of key-value cache replicas addressed by the routers
//! - LLMInferenceJob: a one-shot inference run executed as a batch Job

pub mod v1alpha1;

pub use v1alpha1::{
    InferenceService, InferenceServiceSpec, InferenceServiceStatus, KVCachePool, KVCachePoolSpec,
    KVCachePoolStatus, LLMInferenceJob, LLMInferenceJobSpec, LLMInferenceJobStatus,
};
