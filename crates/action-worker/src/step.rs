// Steps and their lifecycle stages.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use action_common::constants::conditions;
use action_common::ActionError;
use action_sdk::ProcessStartInfo;

use crate::action_manifest_manager::ActionStepDefinition;
use crate::execution_context::ExecutionContext;
use crate::file_command_manager::FileCommandManager;
use crate::step_action_remote::RemoteActionStep;

/// Lifecycle stage of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Pre,
    Main,
    Post,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Pre => write!(f, "pre"),
            Stage::Main => write!(f, "main"),
            Stage::Post => write!(f, "post"),
        }
    }
}

/// A step that the steps runner drives through pre, main and post.
#[async_trait]
pub trait Step: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> String;

    fn continue_on_error(&self) -> bool;

    /// Condition guarding `stage`, or `None` when the step has nothing to
    /// run in it. Pre and post are only known after [`Step::prepare`].
    fn condition(&self, stage: Stage) -> Option<String>;

    /// Resolve whatever the step needs before a stage can run.
    async fn prepare(&mut self, context: &mut ExecutionContext) -> Result<()>;

    async fn run(&mut self, stage: Stage, context: &mut ExecutionContext) -> Result<()>;
}

/// Build the step for a step definition. `index` names steps without an id.
pub fn create_step(definition: &ActionStepDefinition, index: usize) -> Result<Box<dyn Step>> {
    let id = definition
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("__{}", index));

    match (&definition.uses, &definition.run) {
        (Some(_), Some(_)) => anyhow::bail!("Step '{}' cannot set both 'uses' and 'run'", id),
        (Some(uses), None) => {
            if uses.starts_with("./") || uses.starts_with("docker://") {
                return Err(ActionError::Unsupported {
                    message: format!("'{}' is not a remote repository action", uses),
                }
                .into());
            }
            Ok(Box::new(RemoteActionStep::new(id, definition.clone())))
        }
        (None, Some(_)) => Ok(Box::new(ScriptStep::new(id, definition.clone()))),
        (None, None) => anyhow::bail!("Step '{}' must set either 'uses' or 'run'", id),
    }
}

/// Inline `run:` step, executed by the step host.
pub struct ScriptStep {
    id: String,
    definition: ActionStepDefinition,
}

impl ScriptStep {
    pub fn new(id: String, definition: ActionStepDefinition) -> Self {
        Self { id, definition }
    }
}

#[async_trait]
impl Step for ScriptStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> String {
        match &self.definition.name {
            Some(name) => name.clone(),
            None => format!(
                "Run {}",
                self.definition
                    .run
                    .as_deref()
                    .and_then(|r| r.lines().find(|l| !l.trim().is_empty()))
                    .unwrap_or_default()
                    .trim()
            ),
        }
    }

    fn continue_on_error(&self) -> bool {
        self.definition.continue_on_error
    }

    fn condition(&self, stage: Stage) -> Option<String> {
        match stage {
            Stage::Main => Some(
                self.definition
                    .condition
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| conditions::SUCCESS.to_string()),
            ),
            Stage::Pre | Stage::Post => None,
        }
    }

    async fn prepare(&mut self, _context: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    async fn run(&mut self, stage: Stage, context: &mut ExecutionContext) -> Result<()> {
        if stage != Stage::Main {
            return Ok(());
        }

        let script = context.interpolate(self.definition.run.as_deref().unwrap_or_default())?;
        for (key, value) in &self.definition.env {
            let value = context.interpolate(value)?;
            context.step_environment.insert(key.clone(), value);
        }

        let shell = match &self.definition.shell {
            Some(shell) => context.interpolate(shell)?,
            None => default_shell().to_string(),
        };
        let (program, args) = parse_shell(&shell);

        let file_commands = {
            let temp = context.global().temp_directory.clone();
            FileCommandManager::initialize(&temp)?
        };
        let script_file = file_commands.directory().join("script.sh");
        std::fs::write(&script_file, &script)
            .with_context(|| format!("Failed to write script file '{}'", script_file.display()))?;

        let workspace = context.settings().workdir.clone();
        let working_directory = match &self.definition.working_directory {
            Some(dir) => workspace.join(context.interpolate(dir)?),
            None => workspace,
        };

        let script_path = script_file.display().to_string();
        let mut env = context.environment();
        env.extend(file_commands.environment());
        let step_host = Arc::clone(&context.services().step_host);
        let info = ProcessStartInfo::new(program)
            .args(args.iter().map(|a| a.replace("{0}", &script_path)))
            .current_dir(step_host.to_target_path(&working_directory))
            .envs(&env);

        context.section(&format!("Run {}", script.lines().next().unwrap_or_default()));
        context.debug(&format!("{} {}", info.file_name, info.display_arguments()));
        let output = step_host.execute(&info, context.cancel_token()).await?;
        for line in output.stdout.iter().chain(output.stderr.iter()) {
            context.info(line);
        }
        context.end_section();
        file_commands.process(context)?;

        if !output.success() {
            anyhow::bail!("Process completed with exit code {}.", output.exit_code);
        }
        Ok(())
    }
}

fn default_shell() -> &'static str {
    if std::path::Path::new("/bin/bash").exists() || std::path::Path::new("/usr/bin/bash").exists() {
        "bash"
    } else {
        "sh"
    }
}

/// Program and arguments for a `shell:` value; `{0}` is the script path.
fn parse_shell(shell: &str) -> (String, Vec<String>) {
    let to_vec = |args: &[&str]| args.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    match shell.trim() {
        "bash" => (
            "bash".to_string(),
            to_vec(&["--noprofile", "--norc", "-eo", "pipefail", "{0}"]),
        ),
        "sh" => ("sh".to_string(), to_vec(&["-e", "{0}"])),
        "python" => ("python3".to_string(), to_vec(&["{0}"])),
        custom => {
            let mut parts = custom.split_whitespace().map(str::to_string);
            let program = parts.next().unwrap_or_else(|| "sh".to_string());
            let mut args: Vec<String> = parts.collect();
            if !args.iter().any(|a| a.contains("{0}")) {
                args.push("{0}".to_string());
            }
            (program, args)
        }
    }
}
