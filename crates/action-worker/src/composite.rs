// Subordinate execution context for composite actions.
//
// Created once per owning step instance; on every later stage only the
// environment overlay, inputs and prepend path are refreshed. The nested
// step list is never rebuilt.

use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use action_common::constants::COMPOSITE_ACTIONS_MAX_DEPTH;
use action_common::{ActionError, TaskResult};

use crate::action_manifest_manager::ActionDefinition;
use crate::execution_context::ExecutionContext;
use crate::step::{create_step, Stage};
use crate::steps_runner::{StepEntry, StepsRunner};

const ACTION_PATH_VARIABLE: &str = "GITHUB_ACTION_PATH";

pub struct CompositeContext {
    context: ExecutionContext,
    definition: Arc<ActionDefinition>,
    steps: Vec<StepEntry>,
}

impl CompositeContext {
    /// Build the nested context for `definition` under the step context
    /// `parent`. Fails when the nesting limit would be exceeded.
    pub fn create(
        parent: &ExecutionContext,
        definition: Arc<ActionDefinition>,
        action_path: PathBuf,
        environment: HashMap<String, String>,
        inputs: HashMap<String, String>,
    ) -> Result<Self> {
        if parent.depth() >= COMPOSITE_ACTIONS_MAX_DEPTH {
            return Err(ActionError::MaxDepthExceeded {
                max: COMPOSITE_ACTIONS_MAX_DEPTH,
            }
            .into());
        }

        let steps = definition
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| create_step(step, index).map(StepEntry::new))
            .collect::<Result<Vec<_>>>()?;

        let mut context = parent.create_child(parent.display_name(), action_path.clone());
        let mut github = context.github_context().clone();
        github.action_path = action_path.display().to_string();
        context.set_github_context(github);

        let mut composite = Self {
            context,
            definition,
            steps,
        };
        composite.apply(parent, environment, inputs);
        Ok(composite)
    }

    /// Re-derive the environment overlay, inputs and prepend path from the
    /// owning step's current stage. Nested steps are left untouched.
    pub fn refresh(
        &mut self,
        parent: &ExecutionContext,
        environment: HashMap<String, String>,
        inputs: HashMap<String, String>,
    ) {
        self.apply(parent, environment, inputs);
    }

    fn apply(
        &mut self,
        parent: &ExecutionContext,
        mut environment: HashMap<String, String>,
        inputs: HashMap<String, String>,
    ) {
        if let Some(path) = self.context.action_path() {
            environment.insert(ACTION_PATH_VARIABLE.to_string(), path.display().to_string());
        }
        self.context.scope_environment = environment;
        self.context.inputs = inputs;
        self.context.prepend_path = parent.prepend_path.clone();
    }

    /// Run `stage` of every nested step and return the composite's status.
    pub async fn run_stage(&mut self, stage: Stage) -> TaskResult {
        StepsRunner::run_stage(&mut self.context, &mut self.steps, stage).await;
        self.context.status()
    }

    /// Evaluate the declared outputs against the nested steps' results.
    pub fn outputs(&self) -> Result<HashMap<String, String>, ActionError> {
        let mut outputs = HashMap::new();
        for (name, output) in &self.definition.outputs {
            if let Some(value) = &output.value {
                outputs.insert(name.clone(), self.context.interpolate(value)?);
            }
        }
        Ok(outputs)
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_manifest_manager::ActionManifestManager;
    use crate::execution_context::test_support::*;
    use crate::git::{CloneError, CloneInput, GitCloner};
    use async_trait::async_trait;
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

    const COMPOSITE: &str = r#"
name: greet
inputs:
  who:
    default: world
outputs:
  greeting:
    value: ${{ steps.say.outputs.text }}
runs:
  using: composite
  steps:
    - id: say
      shell: sh
      run: echo "text=hello $INPUT_WHO from ${{ inputs.who }}" >> "$GITHUB_OUTPUT"
"#;

    fn setup() -> (tempfile::TempDir, ExecutionContext, Arc<ActionDefinition>) {
        let temp = tempfile::tempdir().unwrap();
        let mut test = TestServices::new(Arc::new(NoopCloner), &temp.path().join("cache"));
        test.settings.workdir = temp.path().to_path_buf();
        let root = root_context(test.build(), temp.path());
        let definition = Arc::new(ActionManifestManager::parse_action_yaml(COMPOSITE).unwrap());
        (temp, root, definition)
    }

    fn env_and_inputs(who: &str) -> (HashMap<String, String>, HashMap<String, String>) {
        (
            HashMap::from([("INPUT_WHO".to_string(), who.to_string())]),
            HashMap::from([("who".to_string(), who.to_string())]),
        )
    }

    #[test]
    fn test_create_builds_child_context() {
        let (_temp, mut root, definition) = setup();
        root.prepend_path.push("/opt/a".into());
        let parent = root.create_step_context("outer", "outer");
        let (env, inputs) = env_and_inputs("mona");

        let composite =
            CompositeContext::create(&parent, definition, PathBuf::from("/actions/greet"), env, inputs)
                .unwrap();
        let ctx = composite.context();
        assert_eq!(ctx.depth(), 1);
        assert_eq!(composite.step_count(), 1);
        assert_eq!(ctx.inputs["who"], "mona");
        assert_eq!(ctx.scope_environment["INPUT_WHO"], "mona");
        assert_eq!(ctx.scope_environment[ACTION_PATH_VARIABLE], "/actions/greet");
        assert_eq!(ctx.github_context().action_path, "/actions/greet");
        assert_eq!(ctx.prepend_path, vec!["/opt/a".to_string()]);
    }

    #[test]
    fn test_refresh_updates_overlay_only() {
        let (_temp, mut root, definition) = setup();
        let parent = root.create_step_context("outer", "outer");
        let (env, inputs) = env_and_inputs("mona");
        let mut composite =
            CompositeContext::create(&parent, definition, PathBuf::from("/actions/greet"), env, inputs)
                .unwrap();

        root.prepend_path.push("/opt/new".into());
        let parent = root.create_step_context("outer", "outer");
        let (env, inputs) = env_and_inputs("octocat");
        composite.refresh(&parent, env, inputs);

        let ctx = composite.context();
        assert_eq!(composite.step_count(), 1);
        assert_eq!(ctx.inputs["who"], "octocat");
        assert_eq!(ctx.scope_environment["INPUT_WHO"], "octocat");
        assert_eq!(ctx.scope_environment[ACTION_PATH_VARIABLE], "/actions/greet");
        assert_eq!(ctx.prepend_path, vec!["/opt/new".to_string()]);
    }

    #[test]
    fn test_depth_limit() {
        let (_temp, root, definition) = setup();
        let mut parent = root.create_step_context("outer", "outer");
        for _ in 0..COMPOSITE_ACTIONS_MAX_DEPTH {
            parent = parent.create_child("nested", PathBuf::from("/x"));
        }
        let (env, inputs) = env_and_inputs("mona");
        let err = CompositeContext::create(&parent, definition, PathBuf::from("/x"), env, inputs)
            .err()
            .unwrap();
        assert!(matches!(
            ActionError::find(&err),
            Some(ActionError::MaxDepthExceeded { max: 9 })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_stages_and_outputs() {
        let (_temp, root, definition) = setup();
        let parent = root.create_step_context("outer", "outer");
        let (env, inputs) = env_and_inputs("mona");
        let mut composite =
            CompositeContext::create(&parent, definition, PathBuf::from("/actions/greet"), env, inputs)
                .unwrap();

        assert_eq!(composite.run_stage(Stage::Pre).await, TaskResult::Succeeded);
        assert_eq!(composite.run_stage(Stage::Main).await, TaskResult::Succeeded);
        assert_eq!(composite.run_stage(Stage::Post).await, TaskResult::Succeeded);
        let outputs = composite.outputs().unwrap();
        assert_eq!(outputs["greeting"], "hello mona from mona");
    }
}
