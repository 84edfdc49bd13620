use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// LLMInferenceJob declares a single inference run over one prompt
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "llm.example.com",
    version = "v1alpha1",
    kind = "LLMInferenceJob",
    plural = "llminferencejobs",
    shortname = "llmjob",
    namespaced,
    status = "LLMInferenceJobStatus",
    printcolumn = r#"{"name":"Completed","type":"boolean","jsonPath":".status.completed"}"#,
)]
pub struct LLMInferenceJobSpec {
    /// Prompt handed to the job runner
    #[serde(default)]
    pub prompt: String,
}

/// Status of an LLMInferenceJob
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LLMInferenceJobStatus {
    /// Set once the runner Job has succeeded. Never cleared.
    #[serde(default)]
    pub completed: bool,

    #[serde(default)]
    pub output: String,
}

impl LLMInferenceJob {
    /// Whether the job has reached its terminal state
    pub fn is_completed(&self) -> bool {
        self.status.as_ref().is_some_and(|status| status.completed)
    }
}
