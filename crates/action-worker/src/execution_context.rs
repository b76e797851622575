// The mutable state a job, a step or a composite action runs in.
// Holds the scoped environment, logging, result tracking and the data used
// to build expression contexts.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use action_common::config_store::RunnerSettings;
use action_common::{ActionError, SecretMasker, TaskResult};

use crate::action_cache::ActionCache;
use crate::action_reference::ServicePrefixPolicy;
use crate::expressions::{EvaluationContext, ExpressionEvaluator};
use crate::github_context::GitHubContext;
use crate::handlers::handler::ActionHandler;
use crate::handlers::step_host::StepHost;
use crate::steps_context::StepsContext;

/// Long-lived collaborators shared by every context of a run.
pub struct WorkerServices {
    pub settings: Arc<RunnerSettings>,
    pub action_cache: Arc<ActionCache>,
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub step_host: Arc<dyn StepHost>,
    pub handler: Arc<dyn ActionHandler>,
    pub secret_masker: SecretMasker,
    pub prefix_policy: ServicePrefixPolicy,
}

/// Shared mutable state for the entire job, accessible from all step contexts.
pub struct Global {
    /// Job-level `env`.
    pub environment_variables: HashMap<String, String>,

    /// `PATH` of the worker process, extended by the prepend path of a context.
    pub base_path: String,

    /// Where per-step scratch files are created.
    pub temp_directory: PathBuf,

    pub cancel_token: CancellationToken,

    pub write_debug: bool,
}

/// Execution context for a job, a step, or the nested steps of a composite
/// action.
pub struct ExecutionContext {
    services: Arc<WorkerServices>,

    global: Arc<RwLock<Global>>,

    display_name: String,

    current_step_id: Option<String>,

    /// Result of this context (step result, or the aggregate of the steps
    /// run in it).
    result: Option<TaskResult>,

    /// Status of the enclosing scope when this context was created; drives
    /// `success()`/`failure()`.
    job_status: TaskResult,

    /// Outputs collected by this step context.
    pub outputs: HashMap<String, String>,

    /// Environment overlay inherited by steps created from this context.
    pub scope_environment: HashMap<String, String>,

    /// Step-level environment variable overrides.
    pub step_environment: HashMap<String, String>,

    /// `GITHUB_ENV` values written by the step, applied to the parent.
    pub exported_environment: HashMap<String, String>,

    /// Directories prepended to `PATH`, most recent first.
    pub prepend_path: Vec<String>,

    /// `GITHUB_PATH` entries written by the step, applied to the parent.
    pub added_path: Vec<String>,

    /// Values of the `inputs` expression context.
    pub inputs: HashMap<String, String>,

    github_context: GitHubContext,

    steps_context: StepsContext,

    /// Target path of the action whose steps run in this context.
    action_path: Option<PathBuf>,

    log_lines: Vec<String>,

    /// Composite nesting depth; 0 for the job.
    depth: u32,
}

impl ExecutionContext {
    /// Create the root execution context for a job.
    pub fn new_root(
        services: Arc<WorkerServices>,
        global: Global,
        github_context: GitHubContext,
        display_name: String,
    ) -> Self {
        Self {
            services,
            global: Arc::new(RwLock::new(global)),
            display_name,
            current_step_id: None,
            result: None,
            job_status: TaskResult::Succeeded,
            outputs: HashMap::new(),
            scope_environment: HashMap::new(),
            step_environment: HashMap::new(),
            exported_environment: HashMap::new(),
            prepend_path: Vec::new(),
            added_path: Vec::new(),
            inputs: HashMap::new(),
            github_context,
            steps_context: StepsContext::new(),
            action_path: None,
            log_lines: Vec::new(),
            depth: 0,
        }
    }

    /// Create the context a single step stage runs in.
    pub fn create_step_context(&self, step_id: &str, display_name: &str) -> Self {
        let mut github_context = self.github_context.clone();
        github_context.action = step_id.to_string();
        Self {
            services: Arc::clone(&self.services),
            global: Arc::clone(&self.global),
            display_name: display_name.to_string(),
            current_step_id: Some(step_id.to_string()),
            result: None,
            job_status: self.status(),
            outputs: HashMap::new(),
            scope_environment: self.scope_environment.clone(),
            step_environment: HashMap::new(),
            exported_environment: HashMap::new(),
            prepend_path: self.prepend_path.clone(),
            added_path: Vec::new(),
            inputs: self.inputs.clone(),
            github_context,
            steps_context: self.steps_context.clone(),
            action_path: self.action_path.clone(),
            log_lines: Vec::new(),
            depth: self.depth,
        }
    }

    /// Create a child context for the nested steps of a composite action.
    pub fn create_child(&self, display_name: &str, action_path: PathBuf) -> Self {
        Self {
            services: Arc::clone(&self.services),
            global: Arc::clone(&self.global),
            display_name: display_name.to_string(),
            current_step_id: self.current_step_id.clone(),
            result: None,
            job_status: TaskResult::Succeeded,
            outputs: HashMap::new(),
            scope_environment: HashMap::new(),
            step_environment: HashMap::new(),
            exported_environment: HashMap::new(),
            prepend_path: self.prepend_path.clone(),
            added_path: Vec::new(),
            inputs: HashMap::new(),
            github_context: self.github_context.clone(),
            steps_context: StepsContext::new(),
            action_path: Some(action_path),
            log_lines: Vec::new(),
            depth: self.depth + 1,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn current_step_id(&self) -> Option<&str> {
        self.current_step_id.as_deref()
    }

    pub fn services(&self) -> &Arc<WorkerServices> {
        &self.services
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.services.settings
    }

    /// Read access to the global shared state.
    pub fn global(&self) -> parking_lot::RwLockReadGuard<'_, Global> {
        self.global.read()
    }

    /// Write access to the global shared state.
    pub fn global_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Global> {
        self.global.write()
    }

    /// Get the cancellation token for this job.
    pub fn cancel_token(&self) -> CancellationToken {
        self.global.read().cancel_token.clone()
    }

    pub fn result(&self) -> Option<TaskResult> {
        self.result
    }

    /// The result so far, `Succeeded` when nothing was recorded.
    pub fn status(&self) -> TaskResult {
        self.result.unwrap_or(TaskResult::Succeeded)
    }

    pub fn github_context(&self) -> &GitHubContext {
        &self.github_context
    }

    pub fn steps_context(&self) -> &StepsContext {
        &self.steps_context
    }

    pub fn steps_context_mut(&mut self) -> &mut StepsContext {
        &mut self.steps_context
    }

    pub fn action_path(&self) -> Option<&Path> {
        self.action_path.as_deref()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn secret_masker(&self) -> &SecretMasker {
        &self.services.secret_masker
    }

    // -----------------------------------------------------------------------
    // Setters
    // -----------------------------------------------------------------------

    pub fn set_github_context(&mut self, ctx: GitHubContext) {
        self.github_context = ctx;
    }

    pub fn set_result(&mut self, result: TaskResult) {
        self.result = Some(result);
    }

    /// Fold a step result into this context's result.
    pub fn merge_result(&mut self, result: TaskResult) {
        self.result = Some(TaskResult::merge(self.result, result));
    }

    /// Apply the `GITHUB_ENV`/`GITHUB_PATH` changes a finished step made.
    pub fn absorb_step(&mut self, step: &ExecutionContext) {
        for (k, v) in &step.exported_environment {
            self.scope_environment.insert(k.clone(), v.clone());
        }
        for dir in &step.added_path {
            self.prepend_path.retain(|p| p != dir);
            self.prepend_path.insert(0, dir.clone());
        }
    }

    // -----------------------------------------------------------------------
    // Logging
    // -----------------------------------------------------------------------

    /// Write an informational message.
    pub fn info(&mut self, message: &str) {
        let masked = self.secret_masker().mask_secrets(message);
        tracing::info!(target: "step", "[{}] {}", self.display_name, masked);
        self.log_lines.push(masked);
    }

    /// Write a debug message (only if debug mode is enabled).
    pub fn debug(&mut self, message: &str) {
        if self.global.read().write_debug {
            let masked = self.secret_masker().mask_secrets(message);
            tracing::debug!(target: "step", "[{}] {}", self.display_name, masked);
            self.log_lines.push(format!("##[debug]{}", masked));
        }
    }

    pub fn warning(&mut self, message: &str) {
        let masked = self.secret_masker().mask_secrets(message);
        tracing::warn!(target: "step", "[{}] {}", self.display_name, masked);
        self.log_lines.push(format!("##[warning]{}", masked));
    }

    pub fn error(&mut self, message: &str) {
        let masked = self.secret_masker().mask_secrets(message);
        tracing::error!(target: "step", "[{}] {}", self.display_name, masked);
        self.log_lines.push(format!("##[error]{}", masked));
    }

    /// Write a section / group header.
    pub fn section(&mut self, message: &str) {
        let masked = self.secret_masker().mask_secrets(message);
        tracing::info!(target: "step", "[{}] >> {}", self.display_name, masked);
        self.log_lines.push(format!("##[group]{}", masked));
    }

    pub fn end_section(&mut self) {
        self.log_lines.push("##[endgroup]".to_string());
    }

    /// Get all log lines recorded in this context.
    pub fn log_lines(&self) -> &[String] {
        &self.log_lines
    }

    // -----------------------------------------------------------------------
    // Environment and expressions
    // -----------------------------------------------------------------------

    /// Effective environment: job env, then the scope overlay, then the
    /// step's own env, with the prepend path applied to `PATH`.
    pub fn environment(&self) -> HashMap<String, String> {
        let global = self.global.read();
        let mut env = global.environment_variables.clone();
        env.extend(self.scope_environment.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(self.step_environment.iter().map(|(k, v)| (k.clone(), v.clone())));

        if !self.prepend_path.is_empty() {
            let current = env.get("PATH").cloned().unwrap_or_else(|| global.base_path.clone());
            let separator = if cfg!(windows) { ";" } else { ":" };
            let mut parts = self.prepend_path.clone();
            if !current.is_empty() {
                parts.push(current);
            }
            env.insert("PATH".to_string(), parts.join(separator));
        }
        env
    }

    /// Build the data expressions are evaluated against.
    pub fn expression_context(&self) -> EvaluationContext {
        let mut env = self.global.read().environment_variables.clone();
        env.extend(self.scope_environment.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(self.step_environment.iter().map(|(k, v)| (k.clone(), v.clone())));

        let data = serde_json::json!({
            "github": self.github_context.to_value(),
            "env": env,
            "inputs": self.inputs,
            "steps": self.steps_context.to_value(),
            "job": { "status": self.job_status.as_outcome() },
        });
        EvaluationContext::new(data, self.job_status, self.cancel_token().is_cancelled())
    }

    pub fn interpolate(&self, input: &str) -> Result<String, ActionError> {
        let context = self.expression_context();
        self.services.evaluator.interpolate(&context, input)
    }

    pub fn evaluate_condition(&self, condition: &str) -> Result<bool, ActionError> {
        let context = self.expression_context();
        self.services.evaluator.evaluate_condition(&context, condition)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::git::{CloneError, CloneInput, GitCloner};

    struct NoopCloner;

    #[async_trait::async_trait]
    impl GitCloner for NoopCloner {
        async fn clone_repository(
            &self,
            _input: &CloneInput,
            _cancel: CancellationToken,
        ) -> Result<(), CloneError> {
            Ok(())
        }
    }

    fn make_test_context() -> (tempfile::TempDir, ExecutionContext) {
        let dir = tempfile::tempdir().unwrap();
        let services = TestServices::new(Arc::new(NoopCloner), dir.path()).build();
        let ctx = root_context(services, dir.path());
        (dir, ctx)
    }

    #[test]
    fn test_context_logging_masks_secrets() {
        let (_dir, mut ctx) = make_test_context();
        ctx.secret_masker().add_value("hunter2");
        ctx.info("password is hunter2");
        ctx.debug("Debug info");
        ctx.warning("A warning");
        ctx.error("An error");
        assert_eq!(ctx.log_lines().len(), 4);
        assert_eq!(ctx.log_lines()[0], "password is ***");
    }

    #[test]
    fn test_create_step_context() {
        let (_dir, mut ctx) = make_test_context();
        ctx.scope_environment.insert("A".into(), "1".into());
        ctx.merge_result(TaskResult::Failed);
        let step = ctx.create_step_context("step-1", "Run tests");
        assert_eq!(step.current_step_id(), Some("step-1"));
        assert_eq!(step.display_name(), "Run tests");
        assert_eq!(step.depth(), 0);
        assert_eq!(step.github_context().action, "step-1");
        assert_eq!(step.environment().get("A").map(String::as_str), Some("1"));
        assert_eq!(step.expression_context().job_status, TaskResult::Failed);
    }

    #[test]
    fn test_create_child() {
        let (_dir, mut ctx) = make_test_context();
        ctx.prepend_path.push("/opt/tool".into());
        ctx.scope_environment.insert("A".into(), "1".into());
        let child = ctx.create_child("composite", PathBuf::from("/cache/x"));
        assert_eq!(child.depth(), 1);
        assert_eq!(child.prepend_path, vec!["/opt/tool".to_string()]);
        assert!(child.scope_environment.is_empty());
        assert_eq!(child.action_path(), Some(Path::new("/cache/x")));
    }

    #[test]
    fn test_environment_layers_and_path() {
        let (_dir, mut ctx) = make_test_context();
        ctx.global_mut()
            .environment_variables
            .insert("LEVEL".into(), "job".into());
        ctx.scope_environment.insert("LEVEL".into(), "scope".into());
        let mut step = ctx.create_step_context("s", "s");
        step.step_environment.insert("LEVEL".into(), "step".into());
        step.added_path.push("/opt/bin".into());
        step.exported_environment.insert("EXPORTED".into(), "yes".into());
        assert_eq!(step.environment()["LEVEL"], "step");
        assert!(!step.environment().contains_key("PATH"));

        ctx.absorb_step(&step);
        let env = ctx.environment();
        assert_eq!(env["LEVEL"], "scope");
        assert_eq!(env["EXPORTED"], "yes");
        assert_eq!(env["PATH"], "/opt/bin:/usr/bin:/bin");
    }

    #[test]
    fn test_merge_result_keeps_worst() {
        let (_dir, mut ctx) = make_test_context();
        assert_eq!(ctx.status(), TaskResult::Succeeded);
        ctx.merge_result(TaskResult::Failed);
        ctx.merge_result(TaskResult::Succeeded);
        assert_eq!(ctx.result(), Some(TaskResult::Failed));
    }

    #[test]
    fn test_interpolate_uses_contexts() {
        let (_dir, mut ctx) = make_test_context();
        ctx.inputs.insert("name".into(), "Mona".into());
        assert_eq!(
            ctx.interpolate("${{ inputs.name }}@${{ github.repository }}").unwrap(),
            "Mona@octo/hello"
        );
        assert!(ctx.evaluate_condition("").unwrap());
    }
}
