// Drives a list of steps through their stages: every pre in order, then
// every main in order, then every post in reverse order.
//
// Post runs only for steps whose main was attempted (its condition passed),
// including when main failed; it is governed by the step's post condition.

use chrono::Utc;

use action_common::{ActionError, TaskResult};

use crate::execution_context::ExecutionContext;
use crate::step::{Stage, Step};

/// A step plus what the runner learned about it so far.
pub struct StepEntry {
    pub step: Box<dyn Step>,
    /// Main's condition passed and main was started.
    pub main_attempted: bool,
}

impl StepEntry {
    pub fn new(step: Box<dyn Step>) -> Self {
        Self {
            step,
            main_attempted: false,
        }
    }
}

/// Executes the steps of a job or of a composite action in `context`.
pub struct StepsRunner;

impl StepsRunner {
    /// Run all stages and return the resulting status of `context`.
    pub async fn run_all(context: &mut ExecutionContext, steps: &mut [StepEntry]) -> TaskResult {
        Self::run_stage(context, steps, Stage::Pre).await;
        Self::run_stage(context, steps, Stage::Main).await;
        Self::run_stage(context, steps, Stage::Post).await;
        context.status()
    }

    /// Run one stage across `steps`.
    pub async fn run_stage(context: &mut ExecutionContext, steps: &mut [StepEntry], stage: Stage) {
        match stage {
            Stage::Pre => {
                for entry in steps.iter_mut() {
                    Self::run_pre(context, entry).await;
                }
            }
            Stage::Main => {
                for entry in steps.iter_mut() {
                    Self::run_main(context, entry).await;
                }
            }
            Stage::Post => {
                for entry in steps.iter_mut().rev() {
                    Self::run_post(context, entry).await;
                }
            }
        }
    }

    async fn run_pre(context: &mut ExecutionContext, entry: &mut StepEntry) {
        let step = entry.step.as_mut();
        let mut step_context = context.create_step_context(step.id(), &step.display_name());

        // A step that will not run main does not run pre either.
        let main_condition = step.condition(Stage::Main).unwrap_or_default();
        match step_context.evaluate_condition(&main_condition) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                Self::finish(context, step, step_context, Err(e.into()), Stage::Pre);
                return;
            }
        }

        if let Err(e) = step.prepare(&mut step_context).await {
            Self::finish(context, step, step_context, Err(e), Stage::Pre);
            return;
        }

        let Some(condition) = step.condition(Stage::Pre) else {
            return;
        };
        match step_context.evaluate_condition(&condition) {
            Ok(true) => {
                let result = step.run(Stage::Pre, &mut step_context).await;
                Self::finish(context, step, step_context, result, Stage::Pre);
            }
            Ok(false) => {
                context.debug(&format!(
                    "Skipping pre of '{}': '{}' evaluated to false",
                    step.display_name(),
                    condition
                ));
            }
            Err(e) => Self::finish(context, step, step_context, Err(e.into()), Stage::Pre),
        }
    }

    async fn run_main(context: &mut ExecutionContext, entry: &mut StepEntry) {
        let step = entry.step.as_mut();
        let mut step_context = context.create_step_context(step.id(), &step.display_name());
        let condition = step.condition(Stage::Main).unwrap_or_default();

        match step_context.evaluate_condition(&condition) {
            Ok(true) => {}
            Ok(false) => {
                context.info(&format!(
                    "Skipping step '{}' (condition evaluated to false).",
                    step.display_name()
                ));
                context.steps_context_mut().record_skipped(step.id());
                return;
            }
            Err(e) => {
                Self::finish(context, step, step_context, Err(e.into()), Stage::Main);
                return;
            }
        }

        entry.main_attempted = true;
        let started_at = Utc::now();
        context.info(&format!("Starting step: {}", step.display_name()));

        let result = match step.prepare(&mut step_context).await {
            Ok(()) => step.run(Stage::Main, &mut step_context).await,
            Err(e) => Err(e),
        };
        let elapsed = Utc::now().signed_duration_since(started_at);
        context.debug(&format!(
            "Step '{}' took {}.{:03}s",
            step.display_name(),
            elapsed.num_seconds(),
            elapsed.num_milliseconds() % 1000
        ));
        Self::finish(context, step, step_context, result, Stage::Main);
    }

    async fn run_post(context: &mut ExecutionContext, entry: &mut StepEntry) {
        if !entry.main_attempted {
            return;
        }
        let step = entry.step.as_mut();
        let Some(condition) = step.condition(Stage::Post) else {
            return;
        };

        let mut step_context = context.create_step_context(step.id(), &step.display_name());
        match step_context.evaluate_condition(&condition) {
            Ok(true) => {
                context.info(&format!("Running post step: {}", step.display_name()));
                let result = step.run(Stage::Post, &mut step_context).await;
                Self::finish(context, step, step_context, result, Stage::Post);
            }
            Ok(false) => {
                context.debug(&format!(
                    "Skipping post of '{}': '{}' evaluated to false",
                    step.display_name(),
                    condition
                ));
            }
            Err(e) => Self::finish(context, step, step_context, Err(e.into()), Stage::Post),
        }
    }

    /// Fold a finished stage into `context`: apply file command changes,
    /// record main outcomes and merge the conclusion into the result.
    fn finish(
        context: &mut ExecutionContext,
        step: &dyn Step,
        mut step_context: ExecutionContext,
        result: anyhow::Result<()>,
        stage: Stage,
    ) {
        let outcome = match result {
            Ok(()) => step_context.status(),
            Err(e) if ActionError::is_cancelled(&e) => {
                step_context.error(&format!("{} of '{}' was cancelled", stage, step.display_name()));
                TaskResult::Canceled
            }
            Err(e) => {
                step_context.error(&format!("{:#}", e));
                TaskResult::Failed
            }
        };
        let conclusion = if outcome == TaskResult::Failed && step.continue_on_error() {
            step_context.info("Step failed but continue-on-error is enabled.");
            TaskResult::Succeeded
        } else {
            outcome
        };

        context.absorb_step(&step_context);
        if stage == Stage::Main {
            context.steps_context_mut().record(
                step.id(),
                outcome,
                conclusion,
                step_context.outputs.clone(),
            );
        }
        context.merge_result(conclusion);

        context.info(&format!(
            "Step '{}' {} completed with outcome={}, conclusion={}",
            step.display_name(),
            stage,
            outcome.as_outcome(),
            conclusion.as_outcome()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution_context::test_support::*;
    use crate::git::{CloneError, CloneInput, GitCloner};
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct NoopCloner;

    #[async_trait]
    impl GitCloner for NoopCloner {
        async fn clone_repository(
            &self,
            _input: &CloneInput,
            _cancel: CancellationToken,
        ) -> Result<(), CloneError> {
            Ok(())
        }
    }

    /// Records `<id>:<stage>` for every call.
    struct FakeStep {
        id: String,
        main_if: String,
        has_pre: bool,
        has_post: bool,
        fail_main: bool,
        continue_on_error: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl FakeStep {
        fn new(id: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                id: id.to_string(),
                main_if: "success()".to_string(),
                has_pre: true,
                has_post: true,
                fail_main: false,
                continue_on_error: false,
                log: Arc::clone(log),
            }
        }
    }

    #[async_trait]
    impl Step for FakeStep {
        fn id(&self) -> &str {
            &self.id
        }

        fn display_name(&self) -> String {
            self.id.clone()
        }

        fn continue_on_error(&self) -> bool {
            self.continue_on_error
        }

        fn condition(&self, stage: Stage) -> Option<String> {
            match stage {
                Stage::Pre => self.has_pre.then(|| "always()".to_string()),
                Stage::Main => Some(self.main_if.clone()),
                Stage::Post => self.has_post.then(|| "always()".to_string()),
            }
        }

        async fn prepare(&mut self, _context: &mut ExecutionContext) -> Result<()> {
            self.log.lock().push(format!("{}:prepare", self.id));
            Ok(())
        }

        async fn run(&mut self, stage: Stage, context: &mut ExecutionContext) -> Result<()> {
            self.log.lock().push(format!("{}:{}", self.id, stage));
            if stage == Stage::Main {
                context.outputs.insert("ran".into(), "yes".into());
                if self.fail_main {
                    anyhow::bail!("boom");
                }
            }
            Ok(())
        }
    }

    fn context(temp: &tempfile::TempDir) -> ExecutionContext {
        let services = TestServices::new(Arc::new(NoopCloner), temp.path()).build();
        root_context(services, temp.path())
    }

    #[tokio::test]
    async fn test_stage_ordering() {
        let temp = tempfile::tempdir().unwrap();
        let mut ctx = context(&temp);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut steps = vec![
            StepEntry::new(Box::new(FakeStep::new("a", &log))),
            StepEntry::new(Box::new(FakeStep::new("b", &log))),
        ];

        let result = StepsRunner::run_all(&mut ctx, &mut steps).await;
        assert_eq!(result, TaskResult::Succeeded);
        let calls: Vec<String> = log
            .lock()
            .iter()
            .filter(|c| !c.ends_with("prepare"))
            .cloned()
            .collect();
        assert_eq!(
            calls,
            vec!["a:pre", "b:pre", "a:main", "b:main", "b:post", "a:post"]
        );
        assert_eq!(ctx.steps_context().output("a", "ran"), Some("yes"));
    }

    #[tokio::test]
    async fn test_post_runs_after_failed_main_but_not_after_skipped_main() {
        let temp = tempfile::tempdir().unwrap();
        let mut ctx = context(&temp);
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut failing = FakeStep::new("fail", &log);
        failing.fail_main = true;
        let skipped = FakeStep::new("skipped", &log);
        let mut steps = vec![StepEntry::new(Box::new(failing)), StepEntry::new(Box::new(skipped))];

        let result = StepsRunner::run_all(&mut ctx, &mut steps).await;
        assert_eq!(result, TaskResult::Failed);
        let calls = log.lock().clone();
        assert!(calls.contains(&"fail:post".to_string()));
        // Its pre ran while the job was still green; main and post did not.
        assert!(calls.contains(&"skipped:pre".to_string()));
        assert!(!calls.contains(&"skipped:main".to_string()));
        assert!(!calls.contains(&"skipped:post".to_string()));
        assert_eq!(ctx.steps_context().outcome("skipped"), Some(TaskResult::Skipped));
        assert_eq!(ctx.steps_context().outcome("fail"), Some(TaskResult::Failed));
    }

    #[tokio::test]
    async fn test_pre_skipped_when_main_condition_false() {
        let temp = tempfile::tempdir().unwrap();
        let mut ctx = context(&temp);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut step = FakeStep::new("never", &log);
        step.main_if = "false".to_string();
        let mut steps = vec![StepEntry::new(Box::new(step))];

        StepsRunner::run_all(&mut ctx, &mut steps).await;
        assert!(log.lock().is_empty());
        assert!(!steps[0].main_attempted);
    }

    #[tokio::test]
    async fn test_continue_on_error() {
        let temp = tempfile::tempdir().unwrap();
        let mut ctx = context(&temp);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut failing = FakeStep::new("soft", &log);
        failing.fail_main = true;
        failing.continue_on_error = true;
        let mut steps = vec![
            StepEntry::new(Box::new(failing)),
            StepEntry::new(Box::new(FakeStep::new("next", &log))),
        ];

        let result = StepsRunner::run_all(&mut ctx, &mut steps).await;
        assert_eq!(result, TaskResult::Succeeded);
        assert_eq!(ctx.steps_context().outcome("soft"), Some(TaskResult::Failed));
        assert_eq!(ctx.steps_context().conclusion("soft"), Some(TaskResult::Succeeded));
        assert!(log.lock().contains(&"next:main".to_string()));
    }

    #[tokio::test]
    async fn test_failure_condition_runs_after_failure() {
        let temp = tempfile::tempdir().unwrap();
        let mut ctx = context(&temp);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut failing = FakeStep::new("fail", &log);
        failing.fail_main = true;
        let mut cleanup = FakeStep::new("cleanup", &log);
        cleanup.main_if = "failure()".to_string();
        let mut steps = vec![StepEntry::new(Box::new(failing)), StepEntry::new(Box::new(cleanup))];

        StepsRunner::run_all(&mut ctx, &mut steps).await;
        assert!(log.lock().contains(&"cleanup:main".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_job_skips_success_steps() {
        let temp = tempfile::tempdir().unwrap();
        let mut ctx = context(&temp);
        ctx.cancel_token().cancel();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut always = FakeStep::new("always", &log);
        always.main_if = "always()".to_string();
        let mut steps = vec![
            StepEntry::new(Box::new(FakeStep::new("normal", &log))),
            StepEntry::new(Box::new(always)),
        ];

        StepsRunner::run_all(&mut ctx, &mut steps).await;
        let calls = log.lock().clone();
        assert!(!calls.contains(&"normal:main".to_string()));
        assert!(calls.contains(&"always:main".to_string()));
    }
}
