// Runs one stage of a node or container action through the step host.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use action_common::ActionError;
use action_sdk::ProcessStartInfo;

use crate::action_manifest_manager::{ActionDefinition, ActionExecutionType};
use crate::execution_context::ExecutionContext;
use crate::file_command_manager::FileCommandManager;
use crate::step::Stage;

/// Everything a handler needs to run one stage of a resolved action.
#[derive(Debug, Clone)]
pub struct HandlerData {
    pub definition: Arc<ActionDefinition>,

    /// Action root as seen by the step host.
    pub action_directory: PathBuf,

    /// Full environment of the stage, including `INPUT_*`.
    pub environment: HashMap<String, String>,

    pub working_directory: PathBuf,
}

/// Runs the pre/main/post entry point of a non-composite action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn run(
        &self,
        context: &mut ExecutionContext,
        data: &HandlerData,
        stage: Stage,
    ) -> Result<()>;
}

/// Node actions run `node <entry>`; container actions are not supported by
/// the host runtime.
#[derive(Debug, Clone)]
pub struct DefaultActionHandler {
    node: String,
}

impl DefaultActionHandler {
    pub fn new() -> Self {
        Self {
            node: "node".to_string(),
        }
    }
}

impl Default for DefaultActionHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point of `stage` for a node action.
fn node_entry_point(definition: &ActionDefinition, stage: Stage) -> Option<&str> {
    let entry = match stage {
        Stage::Pre => definition.runs.pre.as_deref(),
        Stage::Main => definition.runs.main.as_deref(),
        Stage::Post => definition.runs.post.as_deref(),
    };
    entry.filter(|e| !e.trim().is_empty())
}

#[async_trait]
impl ActionHandler for DefaultActionHandler {
    async fn run(
        &self,
        context: &mut ExecutionContext,
        data: &HandlerData,
        stage: Stage,
    ) -> Result<()> {
        match data.definition.runs.execution_type {
            ActionExecutionType::Node => {}
            ActionExecutionType::Container => {
                return Err(ActionError::Unsupported {
                    message: format!(
                        "'{}' is a container action ('{}'), which this host cannot run",
                        data.definition.name, data.definition.runs.using
                    ),
                }
                .into());
            }
            ActionExecutionType::Composite => {
                anyhow::bail!("Composite actions are run through their nested steps")
            }
        }

        let Some(entry) = node_entry_point(&data.definition, stage) else {
            context.debug(&format!("No {} entry point declared", stage));
            return Ok(());
        };

        let file_commands = {
            let temp = context.global().temp_directory.clone();
            FileCommandManager::initialize(&temp)?
        };
        let mut env = data.environment.clone();
        env.extend(file_commands.environment());
        env.insert(
            "GITHUB_ACTION_PATH".to_string(),
            data.action_directory.display().to_string(),
        );

        let script = data.action_directory.join(entry);
        let info = ProcessStartInfo::new(self.node.clone())
            .arg(script.display().to_string())
            .current_dir(&data.working_directory)
            .envs(&env);
        context.debug(&format!("{} {}", info.file_name, info.display_arguments()));

        let step_host = Arc::clone(&context.services().step_host);
        let output = step_host.execute(&info, context.cancel_token()).await?;
        for line in output.stdout.iter().chain(output.stderr.iter()) {
            context.info(line);
        }
        file_commands.process(context)?;

        if !output.success() {
            anyhow::bail!("Node action completed with exit code {}.", output.exit_code);
        }
        Ok(())
    }
}
