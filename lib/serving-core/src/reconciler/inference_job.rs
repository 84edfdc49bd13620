//! LLMInferenceJob reconciler: runs the prompt once as a batch Job and marks
//! the object completed when the Job succeeds

use super::{child_name, Reconcile};
use crate::children::BatchTask;
use crate::config::WorkloadSettings;
use crate::convergence::{self, owner_reference, Child, ChildAction, Outcome, Plan};
use crate::error::Result;
use crate::store::ObjectStore;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use serving_api::{LLMInferenceJob, LLMInferenceJobStatus};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const RUNNER_SUFFIX: &str = "-runner";

/// Output recorded once the runner succeeds
pub const PLACEHOLDER_OUTPUT: &str = "finished (dummy output)";

/// Lifecycle of an LLMInferenceJob as seen from its status and runner Job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobPhase {
    /// No runner has been observed yet
    Pending,
    /// The runner exists but has not succeeded
    Running,
    /// Terminal; the status records completion
    Completed,
}

impl JobPhase {
    pub fn observe(job: &LLMInferenceJob, runner: Option<&Job>) -> Self {
        if job.is_completed() {
            return JobPhase::Completed;
        }
        match runner {
            None => JobPhase::Pending,
            Some(_) => JobPhase::Running,
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPhase::Pending => write!(f, "Pending"),
            JobPhase::Running => write!(f, "Running"),
            JobPhase::Completed => write!(f, "Completed"),
        }
    }
}

fn succeeded(runner: &Job) -> bool {
    runner
        .status
        .as_ref()
        .and_then(|status| status.succeeded)
        .is_some_and(|count| count > 0)
}

pub struct InferenceJobReconciler<S> {
    store: Arc<S>,
    settings: Arc<WorkloadSettings>,
}

impl<S: ObjectStore> InferenceJobReconciler<S> {
    pub fn new(store: Arc<S>, settings: Arc<WorkloadSettings>) -> Self {
        Self { store, settings }
    }

    pub fn plan(&self, job: &LLMInferenceJob, runner: Option<&Job>) -> Result<Plan<LLMInferenceJobStatus>> {
        let mut plan = Plan::default();
        if job.is_completed() {
            return Ok(plan);
        }

        match runner {
            None => {
                let owner = owner_reference(job)?;
                let name = child_name(&job.name_any(), RUNNER_SUFFIX);
                let namespace = job.namespace().unwrap_or_default();
                let task = BatchTask {
                    name: &name,
                    namespace: &namespace,
                    owner: &owner,
                    container: "runner",
                    image: &self.settings.runner_image,
                    // the prompt reaches the shell as data, never as script
                    command: vec![
                        "sh".to_string(),
                        "-c".to_string(),
                        r#"echo "$PROMPT"; sleep 2"#.to_string(),
                    ],
                    env: vec![("PROMPT", job.spec.prompt.clone())],
                };
                plan.actions.push(ChildAction::Create(Child::Job(task.build())));
            }
            Some(runner) if succeeded(runner) => {
                plan.status = Some(LLMInferenceJobStatus {
                    completed: true,
                    output: PLACEHOLDER_OUTPUT.to_string(),
                });
            }
            Some(_) => {}
        }

        Ok(plan)
    }
}

#[async_trait]
impl<S: ObjectStore + 'static> Reconcile for InferenceJobReconciler<S> {
    type Object = LLMInferenceJob;

    /// The completion check and the runner lookup are separate reads. A pass
    /// racing another pass may try to create a runner that already exists;
    /// that create is absorbed as AlreadyExists and completion is picked up
    /// by whichever pass next observes the succeeded runner.
    #[instrument(skip(self), fields(kind = "LLMInferenceJob"))]
    async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome> {
        let Some(job) = self.store.get::<LLMInferenceJob>(namespace, name).await? else {
            debug!("LLMInferenceJob is gone, nothing to do");
            return Ok(Outcome::Deleted);
        };
        if job.is_completed() {
            debug!("LLMInferenceJob already completed");
            return Ok(Outcome::Converged);
        }

        let runner = self
            .store
            .get::<Job>(namespace, &child_name(name, RUNNER_SUFFIX))
            .await?;
        let phase = JobPhase::observe(&job, runner.as_ref());
        let plan = self.plan(&job, runner.as_ref())?;
        if plan.is_noop() {
            debug!(%phase, "LLMInferenceJob waiting on runner");
            return Ok(Outcome::Converged);
        }
        if plan.status.is_some() {
            info!(from = %phase, "LLMInferenceJob runner succeeded, marking completed");
        }
        convergence::execute(&*self.store, namespace, &job, plan).await?;
        Ok(Outcome::Converged)
    }
}
