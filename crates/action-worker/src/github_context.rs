// The `github.*` expression context for a run, extended per step with the
// resolved action repository and ref.

use std::collections::HashMap;

/// The `github` context available in expressions.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GitHubContext {
    /// The repository (owner/name) the run belongs to.
    pub repository: String,

    pub repository_owner: String,

    /// The ref that triggered the run.
    #[serde(rename = "ref")]
    pub git_ref: String,

    /// The ref name (branch or tag name without refs/heads/ or refs/tags/).
    pub ref_name: String,

    /// The ref type (branch or tag).
    pub ref_type: String,

    pub sha: String,

    /// The server URL (e.g., https://github.com).
    pub server_url: String,

    /// The workspace path.
    pub workspace: String,

    pub job: String,

    /// Id of the step currently running.
    pub action: String,

    /// Directory of the action currently running.
    pub action_path: String,

    /// Version of the action currently running.
    pub action_ref: String,

    /// `org/repo` of the action currently running.
    pub action_repository: String,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl GitHubContext {
    pub fn new(repository: &str, git_ref: &str, workspace: &str, server_url: &str) -> Self {
        let repository_owner = repository
            .split_once('/')
            .map(|(owner, _)| owner.to_string())
            .unwrap_or_default();
        Self {
            repository: repository.to_string(),
            repository_owner,
            git_ref: git_ref.to_string(),
            ref_name: Self::extract_ref_name(git_ref),
            ref_type: Self::extract_ref_type(git_ref),
            server_url: server_url.to_string(),
            workspace: workspace.to_string(),
            ..Default::default()
        }
    }

    /// A copy describing the given action as the one currently running.
    pub fn with_action(&self, action_repository: &str, action_ref: &str) -> Self {
        Self {
            action_repository: action_repository.to_string(),
            action_ref: action_ref.to_string(),
            ..self.clone()
        }
    }

    /// Convert to a serde_json::Value for expression evaluation.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Object(serde_json::Map::new()))
    }

    /// Whether `git_ref` names the same ref as the run, in either its full
    /// (`refs/heads/main`) or short (`main`) form.
    pub fn is_same_ref(&self, git_ref: &str) -> bool {
        git_ref == self.git_ref || (!self.ref_name.is_empty() && git_ref == self.ref_name)
    }

    /// `refs/heads/main` → `main`, `refs/tags/v1.0` → `v1.0`
    fn extract_ref_name(git_ref: &str) -> String {
        if let Some(name) = git_ref.strip_prefix("refs/heads/") {
            name.to_string()
        } else if let Some(name) = git_ref.strip_prefix("refs/tags/") {
            name.to_string()
        } else if let Some(name) = git_ref.strip_prefix("refs/pull/") {
            name.to_string()
        } else {
            git_ref.to_string()
        }
    }

    fn extract_ref_type(git_ref: &str) -> String {
        if git_ref.starts_with("refs/heads/") {
            "branch".to_string()
        } else if git_ref.starts_with("refs/tags/") {
            "tag".to_string()
        } else {
            String::new()
        }
    }
}
