// Git collaborator used to populate action cache entries.
//
// `GitCloner` is the seam the cache talks to; `GitCommandCloner` is the
// default implementation driving the `git` CLI.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use action_common::secret_masker::basic_auth_value;
use action_sdk::{ProcessCancelledError, ProcessInvoker, ProcessOutput, ProcessStartInfo};

/// Hex strings that could be an abbreviated commit id.
static HEX_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{4,40}$").unwrap());

/// What to clone and where.
#[derive(Debug, Clone)]
pub struct CloneInput {
    pub url: String,
    pub git_ref: String,
    pub dir: PathBuf,
    /// Sent as a basic-auth header. Never part of the URL.
    pub token: Option<String>,
}

#[derive(Debug, Error)]
pub enum CloneError {
    /// The ref is an abbreviated commit id; `commit` is the full id.
    #[error("short SHA references are not supported: '{git_ref}' resolves to {commit}")]
    ShortRef { git_ref: String, commit: String },

    /// The local branch has diverged from the remote.
    #[error("Unable to fast-forward '{git_ref}': {message}")]
    FastForwardRequired { git_ref: String, message: String },

    #[error("git operation was cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(anyhow::Error),
}

impl From<anyhow::Error> for CloneError {
    fn from(err: anyhow::Error) -> Self {
        if err.downcast_ref::<ProcessCancelledError>().is_some() {
            CloneError::Cancelled
        } else {
            CloneError::Other(err)
        }
    }
}

/// Clones (or updates) a repository and checks out a ref.
#[async_trait]
pub trait GitCloner: Send + Sync {
    async fn clone_repository(
        &self,
        input: &CloneInput,
        cancel: CancellationToken,
    ) -> Result<(), CloneError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefKind {
    Branch,
    Tag,
    Commit,
}

/// [`GitCloner`] backed by the `git` executable.
pub struct GitCommandCloner {
    git: String,
    invoker: ProcessInvoker,
}

impl Default for GitCommandCloner {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCommandCloner {
    pub fn new(git: impl Into<String>) -> Self {
        Self {
            git: git.into(),
            invoker: ProcessInvoker::new("git"),
        }
    }

    async fn run(
        &self,
        dir: Option<&Path>,
        args: &[&str],
        env: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, CloneError> {
        let mut info = ProcessStartInfo::new(&self.git).args(args.iter().copied()).envs(env);
        if let Some(dir) = dir {
            info = info.current_dir(dir);
        }
        Ok(self.invoker.execute(&info, cancel.clone()).await?)
    }

    async fn run_checked(
        &self,
        dir: Option<&Path>,
        args: &[&str],
        env: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, CloneError> {
        let info = ProcessStartInfo::new(&self.git).args(args.iter().copied());
        Ok(self.run(dir, args, env, cancel).await?.ensure_success(&info)?)
    }

    /// Resolve `git_ref` to a commit, preferring remote branches, then tags.
    async fn resolve(
        &self,
        dir: &Path,
        git_ref: &str,
        env: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<Option<(RefKind, String)>, CloneError> {
        let candidates = [
            (RefKind::Branch, format!("refs/remotes/origin/{}^{{commit}}", git_ref)),
            (RefKind::Tag, format!("refs/tags/{}^{{commit}}", git_ref)),
            (RefKind::Commit, format!("{}^{{commit}}", git_ref)),
        ];
        for (kind, spec) in candidates {
            let out = self
                .run(Some(dir), &["rev-parse", "--verify", "--quiet", spec.as_str()], env, cancel)
                .await?;
            if out.success() {
                if let Some(sha) = out.stdout.first().map(|s| s.trim().to_string()) {
                    if !sha.is_empty() {
                        return Ok(Some((kind, sha)));
                    }
                }
            }
        }
        Ok(None)
    }
}

/// Environment carrying the auth header through `GIT_CONFIG_*` so the token
/// never lands in argv, the remote URL or `.git/config`.
fn git_environment(token: Option<&str>) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("GIT_TERMINAL_PROMPT".to_string(), "0".to_string());
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        env.insert("GIT_CONFIG_COUNT".to_string(), "1".to_string());
        env.insert("GIT_CONFIG_KEY_0".to_string(), "http.extraheader".to_string());
        env.insert(
            "GIT_CONFIG_VALUE_0".to_string(),
            format!("AUTHORIZATION: basic {}", basic_auth_value(token)),
        );
    }
    env
}

#[async_trait]
impl GitCloner for GitCommandCloner {
    async fn clone_repository(
        &self,
        input: &CloneInput,
        cancel: CancellationToken,
    ) -> Result<(), CloneError> {
        let env = git_environment(input.token.as_deref());
        let dir = input.dir.as_path();

        if dir.join(".git").is_dir() {
            tracing::debug!("Updating existing clone in '{}'", dir.display());
            self.run_checked(
                Some(dir),
                &["fetch", "--tags", "--force", "--quiet", "origin"],
                &env,
                &cancel,
            )
            .await?;
        } else {
            tracing::debug!("Cloning '{}' into '{}'", input.url, dir.display());
            std::fs::create_dir_all(dir).map_err(|e| CloneError::Other(e.into()))?;
            let dir_arg = dir.to_string_lossy();
            self.run_checked(
                None,
                &["clone", "--no-checkout", "--quiet", input.url.as_str(), dir_arg.as_ref()],
                &env,
                &cancel,
            )
            .await?;
        }

        let (kind, sha) = self
            .resolve(dir, &input.git_ref, &env, &cancel)
            .await?
            .ok_or_else(|| {
                CloneError::Other(anyhow::anyhow!(
                    "Unable to resolve '{}' in '{}': no branch, tag or commit by that name",
                    input.git_ref,
                    input.url
                ))
            })?;

        if kind == RefKind::Commit
            && HEX_REF.is_match(&input.git_ref)
            && input.git_ref.len() < sha.len()
            && sha.starts_with(&input.git_ref.to_lowercase())
        {
            return Err(CloneError::ShortRef {
                git_ref: input.git_ref.clone(),
                commit: sha,
            });
        }

        match kind {
            RefKind::Branch => {
                let remote = format!("refs/remotes/origin/{}", input.git_ref);
                let local = format!("refs/heads/{}", input.git_ref);
                let has_local = self
                    .run(Some(dir), &["rev-parse", "--verify", "--quiet", local.as_str()], &env, &cancel)
                    .await?
                    .success();
                if has_local {
                    self.run_checked(
                        Some(dir),
                        &["checkout", "--force", "--quiet", input.git_ref.as_str()],
                        &env,
                        &cancel,
                    )
                    .await?;
                    let merged = self
                        .run(Some(dir), &["merge", "--ff-only", "--quiet", remote.as_str()], &env, &cancel)
                        .await?;
                    if !merged.success() {
                        return Err(CloneError::FastForwardRequired {
                            git_ref: input.git_ref.clone(),
                            message: merged.stderr_text(),
                        });
                    }
                } else {
                    self.run_checked(
                        Some(dir),
                        &["checkout", "--force", "--quiet", "-B", input.git_ref.as_str(), remote.as_str()],
                        &env,
                        &cancel,
                    )
                    .await?;
                }
            }
            RefKind::Tag | RefKind::Commit => {
                self.run_checked(
                    Some(dir),
                    &["checkout", "--force", "--quiet", "--detach", sha.as_str()],
                    &env,
                    &cancel,
                )
                .await?;
            }
        }

        tracing::debug!("Checked out {} ({:?}) in '{}'", sha, kind, dir.display());
        Ok(())
    }
}
