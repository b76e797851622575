// The top-level service: wires the collaborators together, builds the job
// context and drives the job's steps to a result.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use action_common::{RunnerSettings, SecretMasker, TaskResult};

use crate::action_cache::{ActionCache, CredentialPolicy};
use crate::action_reference::ServicePrefixPolicy;
use crate::execution_context::{ExecutionContext, Global, WorkerServices};
use crate::expressions::ContextExpressionEvaluator;
use crate::git::GitCommandCloner;
use crate::github_context::GitHubContext;
use crate::handlers::handler::DefaultActionHandler;
use crate::handlers::step_host::DefaultStepHost;
use crate::job::JobDefinition;
use crate::step::create_step;
use crate::steps_runner::{StepEntry, StepsRunner};

/// Describes the run a job belongs to: the repository and ref its
/// workspace holds.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub repository: String,
    pub git_ref: String,
    pub server_url: String,
}

pub struct Worker {
    services: Arc<WorkerServices>,
}

impl Worker {
    pub fn new(services: Arc<WorkerServices>) -> Self {
        Self { services }
    }

    /// Worker backed by the `git` binary and the host process runtime.
    pub fn from_settings(settings: RunnerSettings) -> Self {
        let masker = SecretMasker::new();
        if !settings.trusted_instance_token.is_empty() {
            masker.add_token(&settings.trusted_instance_token);
        }

        let cache = ActionCache::new(
            settings.action_cache_dir.clone(),
            Arc::new(GitCommandCloner::default()),
            CredentialPolicy::from_settings(&settings),
            masker.clone(),
        );
        Self::new(Arc::new(WorkerServices {
            prefix_policy: ServicePrefixPolicy::new(&settings.service_prefixes),
            settings: Arc::new(settings),
            action_cache: Arc::new(cache),
            evaluator: Arc::new(ContextExpressionEvaluator),
            step_host: Arc::new(DefaultStepHost::new()),
            handler: Arc::new(DefaultActionHandler::new()),
            secret_masker: masker,
        }))
    }

    pub fn services(&self) -> &Arc<WorkerServices> {
        &self.services
    }

    /// Run every step of `job`. Errors are reserved for failures to set the
    /// job up; step failures are reported through the returned result.
    pub async fn run_job(
        &self,
        job: &JobDefinition,
        run: &RunInfo,
        cancel: CancellationToken,
    ) -> Result<TaskResult> {
        let settings = &self.services.settings;
        std::fs::create_dir_all(&settings.action_cache_dir).with_context(|| {
            format!(
                "Failed to create action cache directory '{}'",
                settings.action_cache_dir.display()
            )
        })?;
        let temp = tempfile::Builder::new()
            .prefix("action-worker-")
            .tempdir()
            .context("Failed to create the job's temp directory")?;

        let mut steps = job
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| create_step(step, index).map(StepEntry::new))
            .collect::<Result<Vec<_>>>()?;

        let global = Global {
            environment_variables: job.env.clone(),
            base_path: std::env::var("PATH").unwrap_or_default(),
            temp_directory: temp.path().to_path_buf(),
            cancel_token: cancel.clone(),
            write_debug: settings.write_debug,
        };
        let github = GitHubContext::new(
            &run.repository,
            &run.git_ref,
            &settings.workdir.display().to_string(),
            &run.server_url,
        );
        let name = job.name.clone().unwrap_or_else(|| "job".to_string());
        let mut context = ExecutionContext::new_root(Arc::clone(&self.services), global, github, name);

        tracing::info!(
            "Running {} step(s) for {}@{} in '{}'",
            steps.len(),
            run.repository,
            run.git_ref,
            settings.workdir.display()
        );
        let started_at = Utc::now();
        let mut result = StepsRunner::run_all(&mut context, &mut steps).await;
        if cancel.is_cancelled() && result == TaskResult::Succeeded {
            result = TaskResult::Canceled;
        }
        tracing::info!(
            "Job finished with result {} in {}s",
            result,
            Utc::now().signed_duration_since(started_at).num_seconds()
        );
        Ok(result)
    }
}
