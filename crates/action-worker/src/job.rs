// Job file read by the worker: a job's `env` and its list of steps, in the
// same shape as a workflow job.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::action_manifest_manager::{deserialize_string_map, ActionStepDefinition};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobDefinition {
    #[serde(default)]
    pub name: Option<String>,

    /// Job-level environment visible to every step.
    #[serde(default, deserialize_with = "deserialize_string_map")]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub steps: Vec<ActionStepDefinition>,
}

impl JobDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file '{}'", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse job file '{}'", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let job: JobDefinition = serde_yaml::from_str(content)?;
        anyhow::ensure!(!job.steps.is_empty(), "The job has no steps");
        Ok(job)
    }
}
