// A step that runs an action from a remote repository: resolves the `uses`
// reference, fetches it into the action cache, loads its definition and
// drives its pre/main/post stages.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use action_common::constants::{conditions, inputs as input_names};
use action_common::ActionError;
use action_sdk::IOUtil;

use crate::action_cache::FetchStatus;
use crate::action_manifest_manager::{
    ActionDefinition, ActionExecutionType, ActionManifestManager, ActionStepDefinition,
};
use crate::action_reference::ActionReference;
use crate::composite::CompositeContext;
use crate::execution_context::ExecutionContext;
use crate::github_context::GitHubContext;
use crate::handlers::handler::HandlerData;
use crate::step::{Stage, Step};

/// How far resolution of a step's action has progressed.
#[derive(Debug, Clone, Default)]
pub enum ResolutionState {
    #[default]
    Unresolved,
    /// The uses string parsed.
    Referenced { reference: ActionReference },
    /// The cache entry is populated.
    Fetched {
        reference: ActionReference,
        cache_dir: PathBuf,
    },
    /// The action definition is loaded; stages can run.
    Defined {
        reference: ActionReference,
        cache_dir: PathBuf,
        definition: Arc<ActionDefinition>,
    },
}

#[derive(Debug, Error)]
#[error("Invalid resolution transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}

impl ResolutionState {
    pub fn name(&self) -> &'static str {
        match self {
            ResolutionState::Unresolved => "Unresolved",
            ResolutionState::Referenced { .. } => "Referenced",
            ResolutionState::Fetched { .. } => "Fetched",
            ResolutionState::Defined { .. } => "Defined",
        }
    }

    /// Unresolved → Referenced.
    pub fn referenced(&self, reference: ActionReference) -> Result<Self, InvalidTransition> {
        match self {
            ResolutionState::Unresolved => Ok(ResolutionState::Referenced { reference }),
            other => Err(other.invalid("Referenced")),
        }
    }

    /// Referenced → Fetched.
    pub fn fetched(&self, cache_dir: PathBuf) -> Result<Self, InvalidTransition> {
        match self {
            ResolutionState::Referenced { reference } => Ok(ResolutionState::Fetched {
                reference: reference.clone(),
                cache_dir,
            }),
            other => Err(other.invalid("Fetched")),
        }
    }

    /// Fetched → Defined.
    pub fn defined(&self, definition: Arc<ActionDefinition>) -> Result<Self, InvalidTransition> {
        match self {
            ResolutionState::Fetched {
                reference,
                cache_dir,
            } => Ok(ResolutionState::Defined {
                reference: reference.clone(),
                cache_dir: cache_dir.clone(),
                definition,
            }),
            other => Err(other.invalid("Defined")),
        }
    }

    fn invalid(&self, to: &'static str) -> InvalidTransition {
        InvalidTransition {
            from: self.name(),
            to,
        }
    }

    pub fn reference(&self) -> Option<&ActionReference> {
        match self {
            ResolutionState::Unresolved => None,
            ResolutionState::Referenced { reference }
            | ResolutionState::Fetched { reference, .. }
            | ResolutionState::Defined { reference, .. } => Some(reference),
        }
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        match self {
            ResolutionState::Fetched { cache_dir, .. } | ResolutionState::Defined { cache_dir, .. } => {
                Some(cache_dir)
            }
            _ => None,
        }
    }

    pub fn definition(&self) -> Option<&Arc<ActionDefinition>> {
        match self {
            ResolutionState::Defined { definition, .. } => Some(definition),
            _ => None,
        }
    }
}

/// Step running an action referenced as `org/repo[/path]@ref`.
pub struct RemoteActionStep {
    id: String,
    step: ActionStepDefinition,
    state: ResolutionState,
    /// The caller already populated the workspace with the repository
    /// checkout this step would produce.
    local_checkout: bool,
    composite: Option<CompositeContext>,
}

impl RemoteActionStep {
    pub fn new(id: String, step: ActionStepDefinition) -> Self {
        Self {
            id,
            step,
            state: ResolutionState::Unresolved,
            local_checkout: false,
            composite: None,
        }
    }

    pub fn state(&self) -> &ResolutionState {
        &self.state
    }

    pub fn is_local_checkout(&self) -> bool {
        self.local_checkout
    }

    /// `base` extended with the repository and ref of this step's action.
    pub fn github_context(&self, base: &GitHubContext) -> GitHubContext {
        match self.state.reference() {
            Some(reference) => base.with_action(&reference.repository(), &reference.git_ref),
            None => base.clone(),
        }
    }

    fn uses(&self) -> &str {
        self.step.uses.as_deref().unwrap_or_default()
    }

    /// Whether the checkout can be skipped because the workspace already
    /// holds the run's repository at the run's ref.
    fn detect_local_checkout(
        &self,
        reference: &ActionReference,
        context: &ExecutionContext,
    ) -> Result<bool, ActionError> {
        let settings = context.settings();
        if !reference.is_checkout() || settings.no_skip_checkout {
            return Ok(false);
        }

        let github = context.github_context();
        if let Some(repository) = self.step.with.get(input_names::CHECKOUT_REPOSITORY) {
            let repository = context.interpolate(repository)?;
            if !repository.is_empty() && !repository.eq_ignore_ascii_case(&github.repository) {
                return Ok(false);
            }
        }
        if let Some(git_ref) = self.step.with.get(input_names::CHECKOUT_REF) {
            let git_ref = context.interpolate(git_ref)?;
            if !git_ref.is_empty() && !github.is_same_ref(&git_ref) {
                return Ok(false);
            }
        }

        Ok(IOUtil::is_populated_dir(&settings.workdir))
    }

    /// Inputs (interpolated, defaulted from the definition) and the stage
    /// environment: the step's `env` plus `INPUT_*`.
    fn stage_environment(
        &self,
        context: &ExecutionContext,
        definition: &ActionDefinition,
    ) -> Result<(HashMap<String, String>, HashMap<String, String>), ActionError> {
        let mut inputs = HashMap::new();
        for (name, value) in &self.step.with {
            inputs.insert(name.clone(), context.interpolate(value)?);
        }
        for (name, default) in &definition.inputs {
            if !inputs.contains_key(name) {
                inputs.insert(name.clone(), context.interpolate(default)?);
            }
        }

        let mut environment = HashMap::new();
        for (key, value) in &self.step.env {
            environment.insert(key.clone(), context.interpolate(value)?);
        }
        for (name, value) in &inputs {
            environment.insert(input_variable_name(name), value.clone());
        }
        Ok((environment, inputs))
    }

    /// Main stage of a skipped checkout: copy the workspace into the
    /// execution target unless the target is the workspace itself.
    async fn run_local_checkout(&self, context: &mut ExecutionContext) -> Result<()> {
        let (bind_workdir, workdir, use_git_ignore) = {
            let settings = context.settings();
            (settings.bind_workdir, settings.workdir.clone(), settings.use_git_ignore)
        };
        if bind_workdir {
            context.info("Skipping actions/checkout: the workspace is bound to the working directory");
            return Ok(());
        }

        let path = match self.step.with.get(input_names::CHECKOUT_PATH) {
            Some(path) => context.interpolate(path)?,
            None => String::new(),
        };
        let step_host = Arc::clone(&context.services().step_host);
        let destination = step_host.to_target_path(&workdir).join(path.trim_start_matches('/'));
        context.info(&format!(
            "Skipping actions/checkout: copying '{}' to '{}'",
            workdir.display(),
            destination.display()
        ));
        step_host
            .copy_directory(&destination, &workdir, use_git_ignore, context.cancel_token())
            .await
            .context("Failed to copy the workspace into the execution target")
    }
}

/// `INPUT_<NAME>`: upper-cased, spaces replaced with `_`.
pub fn input_variable_name(name: &str) -> String {
    format!(
        "{}{}",
        input_names::ENV_PREFIX,
        name.trim().replace(' ', "_").to_uppercase()
    )
}

async fn load_definition(
    cache_dir: &Path,
    subpath: &str,
    cancel: CancellationToken,
) -> Result<ActionDefinition, ActionError> {
    let dir = cache_dir.to_path_buf();
    let subpath = subpath.to_string();
    let load = tokio::task::spawn_blocking(move || ActionManifestManager::load_action(&dir, &subpath));
    tokio::select! {
        result = load => result.map_err(|e| ActionError::Load {
            path: cache_dir.to_path_buf(),
            message: e.to_string(),
        })?,
        _ = cancel.cancelled() => Err(ActionError::Cancelled),
    }
}

#[async_trait]
impl Step for RemoteActionStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> String {
        self.step
            .name
            .clone()
            .unwrap_or_else(|| format!("Run {}", self.uses()))
    }

    fn continue_on_error(&self) -> bool {
        self.step.continue_on_error
    }

    fn condition(&self, stage: Stage) -> Option<String> {
        match stage {
            Stage::Main => Some(
                self.step
                    .condition
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| conditions::SUCCESS.to_string()),
            ),
            Stage::Pre if self.local_checkout => Some(conditions::NEVER.to_string()),
            Stage::Post if self.local_checkout => None,
            Stage::Pre => self
                .state
                .definition()
                .filter(|d| d.has_pre())
                .map(|d| d.runs.pre_if.clone()),
            Stage::Post => self
                .state
                .definition()
                .filter(|d| d.has_post())
                .map(|d| d.runs.post_if.clone()),
        }
    }

    async fn prepare(&mut self, context: &mut ExecutionContext) -> Result<()> {
        if self.state.definition().is_some()
            || (self.local_checkout && matches!(self.state, ResolutionState::Referenced { .. }))
        {
            return Ok(());
        }

        let cancel = context.cancel_token();
        let uses = context.interpolate(self.uses())?;
        let reference = ActionReference::parse(&uses, &context.services().prefix_policy)?;
        let state = ResolutionState::Unresolved.referenced(reference.clone())?;
        context.set_github_context(context.github_context().with_action(&reference.repository(), &reference.git_ref));

        self.local_checkout = self.detect_local_checkout(&reference, context)?;
        if self.local_checkout {
            context.debug(&format!(
                "'{}' checks out the run's repository, which is already in the workspace",
                uses
            ));
            self.state = state;
            return Ok(());
        }

        let cache = Arc::clone(&context.services().action_cache);
        let fetch = cache.fetch(&reference, &uses, cancel.clone()).await?;
        match &fetch.status {
            FetchStatus::Stale { message } => context.info(&format!(
                "Unable to update '{}', using the cached copy: {}",
                uses, message
            )),
            status => context.debug(&format!(
                "Action '{}' is at '{}' ({:?})",
                uses,
                fetch.cache_dir.display(),
                status
            )),
        }
        let state = state.fetched(fetch.cache_dir.clone())?;

        let definition = load_definition(&fetch.cache_dir, &reference.path, cancel).await?;
        self.state = state.defined(Arc::new(definition))?;
        Ok(())
    }

    async fn run(&mut self, stage: Stage, context: &mut ExecutionContext) -> Result<()> {
        let github = self.github_context(context.github_context());
        context.set_github_context(github);

        if self.local_checkout {
            return match stage {
                Stage::Main => self.run_local_checkout(context).await,
                Stage::Pre | Stage::Post => Ok(()),
            };
        }

        let ResolutionState::Defined {
            reference,
            cache_dir,
            definition,
        } = self.state.clone()
        else {
            anyhow::bail!(
                "Action '{}' cannot run {}: resolution is {}",
                self.uses(),
                stage,
                self.state.name()
            );
        };

        let (environment, inputs) = self.stage_environment(context, &definition)?;
        context.step_environment.extend(environment.clone());
        context.inputs = inputs.clone();

        let step_host = Arc::clone(&context.services().step_host);
        let action_directory = step_host.to_target_path(&cache_dir.join(&reference.path));

        if definition.runs.execution_type == ActionExecutionType::Composite {
            let composite = match self.composite.take() {
                Some(mut composite) => {
                    composite.refresh(context, environment, inputs);
                    composite
                }
                None => CompositeContext::create(
                    context,
                    Arc::clone(&definition),
                    action_directory,
                    environment,
                    inputs,
                )?,
            };
            let composite = self.composite.insert(composite);
            let result = composite.run_stage(stage).await;
            if stage == Stage::Main {
                context.outputs.extend(composite.outputs()?);
            }
            context.merge_result(result);
            return Ok(());
        }

        let data = HandlerData {
            definition,
            action_directory,
            environment: context.environment(),
            working_directory: step_host.to_target_path(&context.settings().workdir),
        };
        let handler = Arc::clone(&context.services().handler);
        handler.run(context, &data, stage).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution_context::test_support::*;
    use crate::git::{CloneError, CloneInput, GitCloner};
    use crate::handlers::handler::ActionHandler;
    use crate::handlers::step_host::StepHost;
    use crate::steps_runner::{StepEntry, StepsRunner};
    use action_common::TaskResult;
    use action_sdk::{ProcessOutput, ProcessStartInfo};
    use parking_lot::Mutex;

    /// Writes `files` into every clone destination and records the inputs.
    #[derive(Default)]
    struct ManifestCloner {
        files: Vec<(String, String)>,
        calls: Mutex<Vec<CloneInput>>,
    }

    impl ManifestCloner {
        fn with_file(mut self, path: &str, content: &str) -> Self {
            self.files.push((path.to_string(), content.to_string()));
            self
        }

        fn calls(&self) -> Vec<CloneInput> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl GitCloner for ManifestCloner {
        async fn clone_repository(
            &self,
            input: &CloneInput,
            _cancel: CancellationToken,
        ) -> Result<(), CloneError> {
            self.calls.lock().push(input.clone());
            for (path, content) in &self.files {
                let file = input.dir.join(path);
                std::fs::create_dir_all(file.parent().unwrap()).unwrap();
                std::fs::write(file, content).unwrap();
            }
            Ok(())
        }
    }

    /// Maps host paths under `target_root` and records copies.
    struct FakeStepHost {
        target_root: PathBuf,
        copies: Mutex<Vec<(PathBuf, PathBuf, bool)>>,
    }

    #[async_trait]
    impl StepHost for FakeStepHost {
        fn to_target_path(&self, host_path: &Path) -> PathBuf {
            self.target_root
                .join(host_path.strip_prefix("/").unwrap_or(host_path))
        }

        async fn copy_directory(
            &self,
            destination: &Path,
            source: &Path,
            respect_ignore_file: bool,
            _cancel_token: CancellationToken,
        ) -> Result<()> {
            self.copies.lock().push((
                destination.to_path_buf(),
                source.to_path_buf(),
                respect_ignore_file,
            ));
            Ok(())
        }

        async fn execute(
            &self,
            _info: &ProcessStartInfo,
            _cancel_token: CancellationToken,
        ) -> Result<ProcessOutput> {
            Ok(ProcessOutput::default())
        }
    }

    /// Records every stage it is asked to run with the stage environment.
    #[derive(Default)]
    struct RecordingHandler {
        runs: Mutex<Vec<(Stage, HashMap<String, String>, PathBuf)>>,
    }

    #[async_trait]
    impl ActionHandler for RecordingHandler {
        async fn run(
            &self,
            context: &mut ExecutionContext,
            data: &HandlerData,
            stage: Stage,
        ) -> Result<()> {
            self.runs.lock().push((
                stage,
                data.environment.clone(),
                data.action_directory.clone(),
            ));
            if stage == Stage::Main {
                context
                    .outputs
                    .insert("repo".into(), context.github_context().action_repository.clone());
            }
            Ok(())
        }
    }

    const NODE_ACTION: &str = r#"
name: node action
inputs:
  greeting:
    default: hello
  who:
    default: ${{ github.repository }}
runs:
  using: node20
  pre: pre.js
  main: main.js
  post: post.js
  post-if: success()
"#;

    struct Harness {
        _temp: tempfile::TempDir,
        workdir: PathBuf,
        target_root: PathBuf,
        cloner: Arc<ManifestCloner>,
        step_host: Arc<FakeStepHost>,
        handler: Arc<RecordingHandler>,
        root: ExecutionContext,
    }

    fn harness(
        cloner: ManifestCloner,
        configure: impl FnOnce(&mut action_common::RunnerSettings),
    ) -> Harness {
        let temp = tempfile::tempdir().unwrap();
        let workdir = temp.path().join("workdir");
        std::fs::create_dir_all(&workdir).unwrap();
        let target_root = temp.path().join("target");

        let cloner = Arc::new(cloner);
        let step_host = Arc::new(FakeStepHost {
            target_root: target_root.clone(),
            copies: Mutex::new(Vec::new()),
        });
        let handler = Arc::new(RecordingHandler::default());

        let mut test = TestServices::new(cloner.clone(), &temp.path().join("cache"));
        test.settings.workdir = workdir.clone();
        configure(&mut test.settings);
        test.step_host = step_host.clone();
        test.handler = handler.clone();
        let root = root_context(test.build(), temp.path());

        Harness {
            _temp: temp,
            workdir,
            target_root,
            cloner,
            step_host,
            handler,
            root,
        }
    }

    fn uses_step(uses: &str) -> ActionStepDefinition {
        ActionStepDefinition {
            uses: Some(uses.to_string()),
            ..Default::default()
        }
    }

    fn reference(uses: &str) -> ActionReference {
        ActionReference::parse(uses, &Default::default()).unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let r = reference("org/repo@v1");
        let state = ResolutionState::Unresolved.referenced(r.clone()).unwrap();
        assert_eq!(state.name(), "Referenced");
        assert_eq!(state.reference(), Some(&r));
        assert!(state.cache_dir().is_none());

        let state = state.fetched(PathBuf::from("/cache/org-repo@v1")).unwrap();
        assert_eq!(state.cache_dir(), Some(Path::new("/cache/org-repo@v1")));

        let definition =
            Arc::new(ActionManifestManager::parse_action_yaml(NODE_ACTION).unwrap());
        let state = state.defined(definition).unwrap();
        assert_eq!(state.name(), "Defined");
        assert!(state.definition().is_some());
        assert_eq!(state.reference(), Some(&r));
    }

    #[test]
    fn test_invalid_transitions() {
        let r = reference("org/repo@v1");
        let definition =
            Arc::new(ActionManifestManager::parse_action_yaml(NODE_ACTION).unwrap());

        let err = ResolutionState::Unresolved
            .fetched(PathBuf::from("/x"))
            .unwrap_err();
        assert_eq!((err.from, err.to), ("Unresolved", "Fetched"));
        assert!(ResolutionState::Unresolved.defined(definition.clone()).is_err());

        let referenced = ResolutionState::Unresolved.referenced(r.clone()).unwrap();
        assert!(referenced.referenced(r.clone()).is_err());
        assert!(referenced.defined(definition).is_err());
    }

    #[tokio::test]
    async fn test_prepare_fetches_and_loads() {
        let h = harness(ManifestCloner::default().with_file("action.yml", NODE_ACTION), |_| {});
        let mut step = RemoteActionStep::new("a".into(), uses_step("org/repo@v1"));
        let mut ctx = h.root.create_step_context("a", "a");

        step.prepare(&mut ctx).await.unwrap();
        assert_eq!(step.state().name(), "Defined");
        assert_eq!(h.cloner.calls().len(), 1);
        assert_eq!(h.cloner.calls()[0].url, "https://github.com/org/repo");
        assert_eq!(ctx.github_context().action_repository, "org/repo");
        assert_eq!(ctx.github_context().action_ref, "v1");

        // A resolved step short-circuits.
        step.prepare(&mut ctx).await.unwrap();
        assert_eq!(h.cloner.calls().len(), 1);

        assert_eq!(step.condition(Stage::Pre).as_deref(), Some("always()"));
        assert_eq!(step.condition(Stage::Main).as_deref(), Some("success()"));
        assert_eq!(step.condition(Stage::Post).as_deref(), Some("success()"));
    }

    #[tokio::test]
    async fn test_same_uses_in_two_steps_fetches_once() {
        let h = harness(ManifestCloner::default().with_file("action.yml", NODE_ACTION), |_| {});
        let mut first = RemoteActionStep::new("a".into(), uses_step("org/repo@v1"));
        let mut second = RemoteActionStep::new("b".into(), uses_step("org/repo@v1"));

        first.prepare(&mut h.root.create_step_context("a", "a")).await.unwrap();
        second.prepare(&mut h.root.create_step_context("b", "b")).await.unwrap();

        assert_eq!(h.cloner.calls().len(), 1);
        assert_eq!(first.state().cache_dir(), second.state().cache_dir());
    }

    #[tokio::test]
    async fn test_prepare_interpolates_uses_and_loads_subpath() {
        let h = harness(
            ManifestCloner::default().with_file("sub/action.yaml", NODE_ACTION),
            |_| {},
        );
        let mut step = RemoteActionStep::new(
            "a".into(),
            uses_step("org/repo/sub@${{ github.ref_name }}"),
        );
        let mut ctx = h.root.create_step_context("a", "a");
        step.prepare(&mut ctx).await.unwrap();
        assert_eq!(step.state().reference().unwrap().git_ref, "main");
        assert_eq!(step.state().definition().unwrap().name, "node action");
    }

    #[tokio::test]
    async fn test_prepare_errors() {
        let h = harness(ManifestCloner::default(), |_| {});

        let mut step = RemoteActionStep::new("a".into(), uses_step("org/repo"));
        let err = step.prepare(&mut h.root.create_step_context("a", "a")).await.unwrap_err();
        assert!(matches!(ActionError::find(&err), Some(ActionError::Parse { .. })));
        assert_eq!(step.state().name(), "Unresolved");

        // Fetched, but the repository has no manifest.
        let mut step = RemoteActionStep::new("b".into(), uses_step("org/empty@v1"));
        let err = step.prepare(&mut h.root.create_step_context("b", "b")).await.unwrap_err();
        assert!(matches!(ActionError::find(&err), Some(ActionError::Load { .. })));
        assert_eq!(step.state().name(), "Unresolved");

        let mut step = RemoteActionStep::new("c".into(), uses_step("org/repo@${{ inputs.x"));
        let err = step.prepare(&mut h.root.create_step_context("c", "c")).await.unwrap_err();
        assert!(matches!(
            ActionError::find(&err),
            Some(ActionError::Interpolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_node_action_stages_receive_inputs() {
        let h = harness(ManifestCloner::default().with_file("action.yml", NODE_ACTION), |_| {});
        let mut def = uses_step("org/repo@v1");
        def.id = Some("node".into());
        def.with.insert("greeting".into(), "hi ${{ github.repository_owner }}".into());
        def.env.insert("EXTRA".into(), "1".into());
        let mut steps = vec![StepEntry::new(Box::new(RemoteActionStep::new("node".into(), def)))];

        let mut root = h.root;
        let result = StepsRunner::run_all(&mut root, &mut steps).await;
        assert_eq!(result, TaskResult::Succeeded);

        let runs = h.handler.runs.lock().clone();
        let stages: Vec<Stage> = runs.iter().map(|(s, _, _)| *s).collect();
        assert_eq!(stages, vec![Stage::Pre, Stage::Main, Stage::Post]);

        let (_, env, action_dir) = &runs[1];
        assert_eq!(env["INPUT_GREETING"], "hi octo");
        assert_eq!(env["INPUT_WHO"], "octo/hello");
        assert_eq!(env["EXTRA"], "1");
        assert!(action_dir.starts_with(&h.target_root));
        assert!(action_dir.ends_with("org-repo@v1"));
        assert_eq!(root.steps_context().output("node", "repo"), Some("org/repo"));
    }

    #[tokio::test]
    async fn test_checkout_skip_copies_workspace() {
        let h = harness(ManifestCloner::default().with_file("action.yml", NODE_ACTION), |_| {});
        std::fs::write(h.workdir.join("README.md"), "hello").unwrap();
        let mut def = uses_step("actions/checkout@v4");
        def.with.insert("path".into(), "src".into());
        def.with.insert("repository".into(), "${{ github.repository }}".into());
        let mut steps = vec![StepEntry::new(Box::new(RemoteActionStep::new("co".into(), def)))];

        let mut root = h.root;
        let result = StepsRunner::run_all(&mut root, &mut steps).await;
        assert_eq!(result, TaskResult::Succeeded);

        assert!(h.cloner.calls().is_empty());
        assert!(h.handler.runs.lock().is_empty());
        let copies = h.step_host.copies.lock().clone();
        assert_eq!(copies.len(), 1);
        let (destination, source, respect_ignore) = &copies[0];
        assert_eq!(source, &h.workdir);
        assert_eq!(destination, &h.step_host.to_target_path(&h.workdir).join("src"));
        assert!(*respect_ignore);
    }

    #[tokio::test]
    async fn test_checkout_skip_with_bound_workdir_copies_nothing() {
        let h = harness(ManifestCloner::default(), |s| s.bind_workdir = true);
        std::fs::write(h.workdir.join("README.md"), "hello").unwrap();
        let mut steps = vec![StepEntry::new(Box::new(RemoteActionStep::new(
            "co".into(),
            uses_step("actions/checkout@v4"),
        )))];

        let mut root = h.root;
        assert_eq!(StepsRunner::run_all(&mut root, &mut steps).await, TaskResult::Succeeded);
        assert!(h.cloner.calls().is_empty());
        assert!(h.step_host.copies.lock().is_empty());
        assert!(h.handler.runs.lock().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_not_skipped() {
        // Disabled by configuration.
        let h = harness(
            ManifestCloner::default().with_file("action.yml", NODE_ACTION),
            |s| s.no_skip_checkout = true,
        );
        std::fs::write(h.workdir.join("README.md"), "hello").unwrap();
        let mut step = RemoteActionStep::new("co".into(), uses_step("actions/checkout@v4"));
        step.prepare(&mut h.root.create_step_context("co", "co")).await.unwrap();
        assert!(!step.is_local_checkout());
        assert_eq!(h.cloner.calls().len(), 1);

        // Workspace not populated.
        let h = harness(ManifestCloner::default().with_file("action.yml", NODE_ACTION), |_| {});
        let mut step = RemoteActionStep::new("co".into(), uses_step("actions/checkout@v4"));
        step.prepare(&mut h.root.create_step_context("co", "co")).await.unwrap();
        assert!(!step.is_local_checkout());

        // Another repository.
        let h = harness(ManifestCloner::default().with_file("action.yml", NODE_ACTION), |_| {});
        std::fs::write(h.workdir.join("README.md"), "hello").unwrap();
        let mut def = uses_step("actions/checkout@v4");
        def.with.insert("repository".into(), "other/repo".into());
        let mut step = RemoteActionStep::new("co".into(), def);
        step.prepare(&mut h.root.create_step_context("co", "co")).await.unwrap();
        assert!(!step.is_local_checkout());

        // Another ref.
        let h = harness(ManifestCloner::default().with_file("action.yml", NODE_ACTION), |_| {});
        std::fs::write(h.workdir.join("README.md"), "hello").unwrap();
        let mut def = uses_step("actions/checkout@v4");
        def.with.insert("ref".into(), "release".into());
        let mut step = RemoteActionStep::new("co".into(), def);
        step.prepare(&mut h.root.create_step_context("co", "co")).await.unwrap();
        assert!(!step.is_local_checkout());
    }

    #[tokio::test]
    async fn test_checkout_skip_state_and_conditions() {
        let h = harness(ManifestCloner::default(), |_| {});
        std::fs::write(h.workdir.join("README.md"), "hello").unwrap();
        let mut def = uses_step("actions/checkout@v4");
        def.with.insert("ref".into(), "main".into());
        let mut step = RemoteActionStep::new("co".into(), def);
        step.prepare(&mut h.root.create_step_context("co", "co")).await.unwrap();

        assert!(step.is_local_checkout());
        assert_eq!(step.state().name(), "Referenced");
        assert_eq!(step.condition(Stage::Pre).as_deref(), Some("false"));
        assert_eq!(step.condition(Stage::Post), None);
        assert_eq!(
            step.github_context(h.root.github_context()).action_repository,
            "actions/checkout"
        );
    }

    #[tokio::test]
    async fn test_token_only_for_trusted_origin() {
        let h = harness(
            ManifestCloner::default().with_file("action.yml", NODE_ACTION),
            |s| {
                s.trusted_instance_url = "https://git.internal".into();
                s.trusted_instance_token = "s3cr3t".into();
            },
        );
        assert_eq!(
            h.root.services().action_cache.credentials().resolve(&reference("org/repo@v1")).token,
            None
        );

        let mut step = RemoteActionStep::new("a".into(), uses_step("org/repo@v1"));
        step.prepare(&mut h.root.create_step_context("a", "a")).await.unwrap();
        let mut step =
            RemoteActionStep::new("b".into(), uses_step("https://git.internal/org/repo@v1"));
        step.prepare(&mut h.root.create_step_context("b", "b")).await.unwrap();

        let calls = h.cloner.calls();
        assert_eq!(calls[0].token, None);
        assert_eq!(calls[1].url, "https://git.internal/org/repo");
        assert_eq!(calls[1].token.as_deref(), Some("s3cr3t"));
    }

    #[tokio::test]
    async fn test_run_before_prepare_fails() {
        let h = harness(ManifestCloner::default(), |_| {});
        let mut step = RemoteActionStep::new("a".into(), uses_step("org/repo@v1"));
        let err = step
            .run(Stage::Main, &mut h.root.create_step_context("a", "a"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unresolved"));
    }

    const COMPOSITE_ACTION: &str = r#"
name: composite
inputs:
  name:
    default: world
outputs:
  result:
    value: ${{ steps.inner.outputs.repo }}
runs:
  using: composite
  steps:
    - id: inner
      uses: org/inner/inner@v2
"#;

    #[tokio::test]
    async fn test_composite_action_runs_nested_steps() {
        let h = harness(
            ManifestCloner::default()
                .with_file("action.yml", COMPOSITE_ACTION)
                .with_file("inner/action.yml", NODE_ACTION),
            |_| {},
        );
        let mut def = uses_step("org/outer@v1");
        def.id = Some("outer".into());
        let mut steps = vec![StepEntry::new(Box::new(RemoteActionStep::new("outer".into(), def)))];

        let mut root = h.root;
        let result = StepsRunner::run_all(&mut root, &mut steps).await;
        assert_eq!(result, TaskResult::Succeeded);

        // Outer and inner were both fetched; the inner node action ran all stages.
        let urls: Vec<String> = h.cloner.calls().into_iter().map(|c| c.url).collect();
        assert_eq!(
            urls,
            vec!["https://github.com/org/outer", "https://github.com/org/inner"]
        );
        let stages: Vec<Stage> = h.handler.runs.lock().iter().map(|(s, _, _)| *s).collect();
        assert_eq!(stages, vec![Stage::Pre, Stage::Main, Stage::Post]);
        assert_eq!(root.steps_context().output("outer", "result"), Some("org/inner"));
    }
}
