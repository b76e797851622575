// Loading of action.yml / action.yaml from a fetched action tree, and the
// step descriptor shared by job files and composite actions.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use action_common::constants::{self, conditions, runs_using};
use action_common::ActionError;

/// Parsed action definition. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct ActionDefinition {
    pub name: String,
    pub description: String,
    pub author: String,

    /// Input definitions: name → default value.
    pub inputs: HashMap<String, String>,

    pub outputs: HashMap<String, OutputDefinition>,

    pub runs: RunsConfiguration,

    /// Steps for composite actions.
    pub steps: Vec<ActionStepDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputDefinition {
    pub description: String,
    /// Expression producing the value (composite actions only).
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionExecutionType {
    Node,
    Container,
    Composite,
}

/// The `runs:` section of an action.yml.
#[derive(Debug, Clone)]
pub struct RunsConfiguration {
    /// Raw `using` value ("node20", "docker", "composite", ...).
    pub using: String,
    pub execution_type: ActionExecutionType,

    pub main: Option<String>,
    pub pre: Option<String>,
    pub post: Option<String>,

    /// Defaults to `always()`.
    pub pre_if: String,
    /// Defaults to `always()`.
    pub post_if: String,

    pub image: Option<String>,
    pub pre_entrypoint: Option<String>,
    pub post_entrypoint: Option<String>,
}

/// A step as written in a job file or a composite action's `runs.steps`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ActionStepDefinition {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, rename = "if")]
    pub condition: Option<String>,

    #[serde(default)]
    pub uses: Option<String>,

    #[serde(default)]
    pub run: Option<String>,

    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub working_directory: Option<String>,

    #[serde(default, deserialize_with = "deserialize_string_map")]
    pub with: HashMap<String, String>,

    #[serde(default, deserialize_with = "deserialize_string_map")]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub continue_on_error: bool,
}

impl ActionDefinition {
    /// Whether the action has anything to run in the pre stage.
    pub fn has_pre(&self) -> bool {
        match self.runs.execution_type {
            ActionExecutionType::Composite => true,
            ActionExecutionType::Node => self.runs.pre.as_deref().is_some_and(|s| !s.is_empty()),
            ActionExecutionType::Container => self
                .runs
                .pre_entrypoint
                .as_deref()
                .is_some_and(|s| !s.is_empty()),
        }
    }

    /// Whether the action has anything to run in the post stage.
    pub fn has_post(&self) -> bool {
        match self.runs.execution_type {
            ActionExecutionType::Composite => true,
            ActionExecutionType::Node => self.runs.post.as_deref().is_some_and(|s| !s.is_empty()),
            ActionExecutionType::Container => self
                .runs
                .post_entrypoint
                .as_deref()
                .is_some_and(|s| !s.is_empty()),
        }
    }
}

/// Manages loading and parsing of action manifest files.
pub struct ActionManifestManager;

impl ActionManifestManager {
    /// Locate the manifest in `cache_dir/subpath`, trying `action.yml`
    /// first, then `action.yaml`.
    pub fn manifest_path(cache_dir: &Path, subpath: &str) -> Option<PathBuf> {
        let dir = if subpath.is_empty() {
            cache_dir.to_path_buf()
        } else {
            cache_dir.join(subpath)
        };
        [
            constants::path::ACTION_MANIFEST_YML_FILE,
            constants::path::ACTION_MANIFEST_YAML_FILE,
        ]
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
    }

    /// Load the definition of the action at `cache_dir/subpath`.
    ///
    /// A missing or malformed manifest is an [`ActionError::Load`].
    pub fn load_action(cache_dir: &Path, subpath: &str) -> Result<ActionDefinition, ActionError> {
        let manifest = Self::manifest_path(cache_dir, subpath).ok_or_else(|| ActionError::Load {
            path: cache_dir.join(subpath),
            message: format!(
                "Can't find '{}' or '{}' under '{}'",
                constants::path::ACTION_MANIFEST_YML_FILE,
                constants::path::ACTION_MANIFEST_YAML_FILE,
                cache_dir.join(subpath).display()
            ),
        })?;

        let content = std::fs::read_to_string(&manifest).map_err(|e| ActionError::Load {
            path: manifest.clone(),
            message: e.to_string(),
        })?;

        Self::parse_action_yaml(&content).map_err(|e| ActionError::Load {
            path: manifest,
            message: format!("{:#}", e),
        })
    }

    /// Parse an action.yml/yaml string into an ActionDefinition.
    pub fn parse_action_yaml(content: &str) -> Result<ActionDefinition> {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(content).context("Failed to parse action YAML")?;
        anyhow::ensure!(yaml.is_mapping(), "Action manifest must be a mapping");

        let name = get_string(&yaml, "name").unwrap_or_default();
        let description = get_string(&yaml, "description").unwrap_or_default();
        let author = get_string(&yaml, "author").unwrap_or_default();

        let mut inputs = HashMap::new();
        if let Some(inputs_map) = yaml.get("inputs").and_then(|v| v.as_mapping()) {
            for (key, value) in inputs_map {
                if let Some(name) = key.as_str() {
                    let default = value.get("default").map(scalar_to_string).unwrap_or_default();
                    inputs.insert(name.to_string(), default);
                }
            }
        }

        let mut outputs = HashMap::new();
        if let Some(outputs_map) = yaml.get("outputs").and_then(|v| v.as_mapping()) {
            for (key, value) in outputs_map {
                if let Some(name) = key.as_str() {
                    outputs.insert(
                        name.to_string(),
                        OutputDefinition {
                            description: get_string(value, "description").unwrap_or_default(),
                            value: get_string(value, "value"),
                        },
                    );
                }
            }
        }

        let runs_yaml = yaml
            .get("runs")
            .ok_or_else(|| anyhow::anyhow!("Missing 'runs' section in action manifest"))?;

        let using = get_string(runs_yaml, "using")
            .ok_or_else(|| anyhow::anyhow!("Missing 'runs.using' in action manifest"))?;
        let execution_type = match using.to_lowercase().as_str() {
            runs_using::COMPOSITE => ActionExecutionType::Composite,
            runs_using::DOCKER => ActionExecutionType::Container,
            other if other.starts_with(runs_using::NODE_PREFIX) => ActionExecutionType::Node,
            other => anyhow::bail!("Unsupported 'runs.using' value '{}'", other),
        };

        let runs = RunsConfiguration {
            using,
            execution_type,
            main: get_string(runs_yaml, "main"),
            pre: get_string(runs_yaml, "pre"),
            post: get_string(runs_yaml, "post"),
            pre_if: get_string(runs_yaml, "pre-if")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| conditions::ALWAYS.to_string()),
            post_if: get_string(runs_yaml, "post-if")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| conditions::ALWAYS.to_string()),
            image: get_string(runs_yaml, "image"),
            pre_entrypoint: get_string(runs_yaml, "pre-entrypoint"),
            post_entrypoint: get_string(runs_yaml, "post-entrypoint"),
        };

        match execution_type {
            ActionExecutionType::Node => anyhow::ensure!(
                runs.main.is_some(),
                "Node action manifest is missing 'runs.main'"
            ),
            ActionExecutionType::Container => anyhow::ensure!(
                runs.image.is_some(),
                "Container action manifest is missing 'runs.image'"
            ),
            ActionExecutionType::Composite => {}
        }

        let steps = if execution_type == ActionExecutionType::Composite {
            match runs_yaml.get("steps") {
                Some(value) => serde_yaml::from_value(value.clone())
                    .context("Failed to parse composite 'runs.steps'")?,
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        Ok(ActionDefinition {
            name,
            description,
            author,
            inputs,
            outputs,
            runs,
            steps,
        })
    }
}

fn get_string(value: &serde_yaml::Value, key: &str) -> Option<String> {
    value.get(key).filter(|v| !v.is_null()).map(scalar_to_string)
}

fn scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Parse a YAML mapping into a HashMap<String, String>.
fn parse_string_map(value: Option<&serde_yaml::Value>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(mapping) = value.and_then(|v| v.as_mapping()) {
        for (k, v) in mapping {
            if let Some(key) = k.as_str().filter(|k| !k.is_empty()) {
                map.insert(key.to_string(), scalar_to_string(v));
            }
        }
    }
    map
}

pub(crate) fn deserialize_string_map<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(parse_string_map(value.as_ref()))
}
