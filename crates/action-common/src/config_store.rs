// Runner settings that control how remote actions are resolved and fetched.
// Loaded from an optional JSON file and overridden by environment variables.

use crate::constants::{self, variables};
use action_sdk::StringUtil;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// RunnerSettings
// ---------------------------------------------------------------------------

/// Settings consumed by action resolution and the step lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Root under which fetched actions are cached.
    #[serde(rename = "ActionCacheDir")]
    pub action_cache_dir: PathBuf,

    /// Host used for references without a scheme (`github.com`).
    #[serde(rename = "DefaultActionInstance")]
    pub default_action_instance: String,

    /// The only origin the instance token is ever sent to.
    #[serde(rename = "TrustedInstanceUrl")]
    pub trusted_instance_url: String,

    #[serde(rename = "TrustedInstanceToken", skip_serializing)]
    pub trusted_instance_token: String,

    /// `host/segment` prefixes of service-hosted actions that carry an
    /// extra path segment before `org/repo`.
    #[serde(rename = "ServicePrefixes")]
    pub service_prefixes: Vec<String>,

    /// Always fetch `actions/checkout`, even when the workspace is populated.
    #[serde(rename = "NoSkipCheckout")]
    pub no_skip_checkout: bool,

    /// The workspace is bind-mounted into the step environment.
    #[serde(rename = "BindWorkdir")]
    pub bind_workdir: bool,

    /// Working tree of the run.
    #[serde(rename = "Workdir")]
    pub workdir: PathBuf,

    /// Skip `.gitignore`d paths when copying the working tree.
    #[serde(rename = "UseGitIgnore")]
    pub use_git_ignore: bool,

    /// `org/repo` names (case-insensitive) that are fetched from github.com
    /// instead of the default instance.
    #[serde(rename = "ReplaceGheActionWithGithubCom")]
    pub replace_ghe_action_with_github_com: Vec<String>,

    #[serde(rename = "WriteDebug")]
    pub write_debug: bool,

    #[serde(rename = "JsonLogs")]
    pub json_logs: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            action_cache_dir: default_cache_dir(|name| std::env::var(name).ok()),
            default_action_instance: constants::DEFAULT_ACTION_INSTANCE.to_string(),
            trusted_instance_url: String::new(),
            trusted_instance_token: String::new(),
            service_prefixes: Vec::new(),
            no_skip_checkout: false,
            bind_workdir: false,
            workdir: PathBuf::from("."),
            use_git_ignore: true,
            replace_ghe_action_with_github_com: Vec::new(),
            write_debug: false,
            json_logs: false,
        }
    }
}

impl RunnerSettings {
    /// Apply `RUNNER_*` overrides using `lookup` to read variables.
    ///
    /// Unparsable booleans are ignored with a warning so a typo never flips
    /// a setting silently.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(variables::ACTION_CACHE_DIR).filter(|v| !v.is_empty()) {
            self.action_cache_dir = PathBuf::from(dir);
        }
        if let Some(instance) = lookup(variables::DEFAULT_ACTION_INSTANCE).filter(|v| !v.is_empty()) {
            self.default_action_instance = instance;
        }
        if let Some(url) = lookup(variables::TRUSTED_INSTANCE_URL) {
            self.trusted_instance_url = url;
        }
        if let Some(token) = lookup(variables::TRUSTED_INSTANCE_TOKEN) {
            self.trusted_instance_token = token;
        }
        if let Some(prefixes) = lookup(variables::SERVICE_PREFIXES) {
            self.service_prefixes = StringUtil::split_list(&prefixes);
        }
        if let Some(dir) = lookup(variables::WORKDIR).filter(|v| !v.is_empty()) {
            self.workdir = PathBuf::from(dir);
        }

        let flags: [(&str, &mut bool); 5] = [
            (variables::NO_SKIP_CHECKOUT, &mut self.no_skip_checkout),
            (variables::BIND_WORKDIR, &mut self.bind_workdir),
            (variables::USE_GITIGNORE, &mut self.use_git_ignore),
            (variables::DEBUG, &mut self.write_debug),
            (variables::JSON_LOGS, &mut self.json_logs),
        ];
        for (name, slot) in flags {
            if let Some(raw) = lookup(name) {
                match StringUtil::convert_to_bool(&raw) {
                    Some(value) => *slot = value,
                    None => tracing::warn!("Ignoring {}='{}': expected a boolean", name, raw),
                }
            }
        }
    }

    /// Reject settings that cannot work at all.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.action_cache_dir.as_os_str().is_empty(),
            "ActionCacheDir must not be empty"
        );
        anyhow::ensure!(
            !self.default_action_instance.trim().is_empty(),
            "DefaultActionInstance must not be empty"
        );
        for prefix in &self.service_prefixes {
            anyhow::ensure!(
                !prefix.contains("://"),
                "Service prefix '{}' must be given as host/path without a scheme",
                prefix
            );
        }
        if !self.trusted_instance_token.is_empty() && self.trusted_instance_url.trim().is_empty() {
            tracing::warn!("A trusted instance token is configured without a trusted instance URL; it will never be sent");
        }
        Ok(())
    }
}

/// `$XDG_CACHE_HOME/act`, falling back to `$HOME/.cache/act`.
pub fn default_cache_dir<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let base = lookup(variables::XDG_CACHE_HOME)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            lookup(variables::HOME)
                .filter(|v| !v.is_empty())
                .map(|home| PathBuf::from(home).join(".cache"))
        })
        .unwrap_or_else(std::env::temp_dir);
    base.join(constants::path::DEFAULT_CACHE_SUBDIRECTORY)
}

// ---------------------------------------------------------------------------
// ConfigurationStore
// ---------------------------------------------------------------------------

/// Loads and saves [`RunnerSettings`] as a JSON file.
pub struct ConfigurationStore {
    config_file_path: PathBuf,
}

impl ConfigurationStore {
    pub fn new(config_file_path: impl Into<PathBuf>) -> Self {
        Self {
            config_file_path: config_file_path.into(),
        }
    }

    pub fn config_file_path(&self) -> &Path {
        &self.config_file_path
    }

    pub fn is_configured(&self) -> bool {
        self.config_file_path.is_file()
    }

    /// Read the settings file. A missing file yields the defaults.
    pub fn get_settings(&self) -> Result<RunnerSettings> {
        if !self.is_configured() {
            tracing::debug!(
                "No settings file at '{}', using defaults",
                self.config_file_path.display()
            );
            return Ok(RunnerSettings::default());
        }

        let content = fs::read_to_string(&self.config_file_path).with_context(|| {
            format!(
                "Failed to read settings file '{}'",
                self.config_file_path.display()
            )
        })?;
        let settings: RunnerSettings = serde_json::from_str(&content).with_context(|| {
            format!(
                "Failed to parse settings file '{}'",
                self.config_file_path.display()
            )
        })?;
        Ok(settings)
    }

    /// Settings file plus process environment overrides, validated.
    pub fn load(&self) -> Result<RunnerSettings> {
        let mut settings = self.get_settings()?;
        settings.apply_overrides(|name| std::env::var(name).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Write the settings file. Tokens are never persisted.
    pub fn save_settings(&self, settings: &RunnerSettings) -> Result<()> {
        if let Some(parent) = self.config_file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.config_file_path, json).with_context(|| {
            format!(
                "Failed to write settings file '{}'",
                self.config_file_path.display()
            )
        })
    }
}
