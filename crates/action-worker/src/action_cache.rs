// On-disk cache of fetched actions.
//
// Each distinct `uses` string owns `<cache_root>/<safe(uses)>`. Writers to
// one entry are serialised in-process by an async mutex and across processes
// by an exclusive lock file under `<cache_root>/.locks`. Fresh clones land in
// a staging directory and are renamed into place; in-place updates are
// bracketed by an `.incomplete` marker so an interrupted update is never
// mistaken for a usable entry.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio_util::sync::CancellationToken;

use action_common::config_store::RunnerSettings;
use action_common::constants::{self, path as paths};
use action_common::{ActionError, SecretMasker};
use action_sdk::{IOUtil, StringUtil, UrlUtil};

use crate::action_reference::ActionReference;
use crate::git::{CloneError, CloneInput, GitCloner};

/// Poll interval while another process holds an entry's lock file.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Decides which URL an action is cloned from and which token, if any,
/// travels with the clone.
#[derive(Debug, Clone, Default)]
pub struct CredentialPolicy {
    pub default_instance: String,
    /// The only origin `trusted_instance_token` is ever sent to.
    pub trusted_instance_url: String,
    pub trusted_instance_token: String,
    /// Lower-cased `org/repo` names fetched from github.com instead.
    pub github_com_redirects: Vec<String>,
}

/// URL and credential chosen for one clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneTarget {
    pub url: String,
    pub token: Option<String>,
}

impl CredentialPolicy {
    pub fn from_settings(settings: &RunnerSettings) -> Self {
        Self {
            default_instance: settings.default_action_instance.clone(),
            trusted_instance_url: settings.trusted_instance_url.clone(),
            trusted_instance_token: settings.trusted_instance_token.clone(),
            github_com_redirects: settings
                .replace_ghe_action_with_github_com
                .iter()
                .map(|r| r.to_lowercase())
                .collect(),
        }
    }

    pub fn resolve(&self, reference: &ActionReference) -> CloneTarget {
        let repository = reference.repository().to_lowercase();
        let url = if self.github_com_redirects.iter().any(|r| *r == repository) {
            format!("{}/{}/{}", constants::GITHUB_COM_URL, reference.org, reference.repo)
        } else {
            reference.clone_url(&self.default_instance)
        };
        let token = if UrlUtil::is_under_origin(&url, &self.trusted_instance_url) {
            non_empty(&self.trusted_instance_token)
        } else {
            None
        };
        CloneTarget { url, token }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// How a fetch left the cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Cloned,
    Updated,
    /// Already fetched earlier in this run; nothing was done.
    AlreadyFetched,
    /// The entry could not be fast-forwarded and is used as it is.
    Stale { message: String },
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub cache_dir: PathBuf,
    pub status: FetchStatus,
}

/// The action cache for one run.
pub struct ActionCache {
    cache_root: PathBuf,
    cloner: Arc<dyn GitCloner>,
    credentials: CredentialPolicy,
    secret_masker: SecretMasker,
    key_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    fetched: DashSet<String>,
}

impl ActionCache {
    pub fn new(
        cache_root: impl Into<PathBuf>,
        cloner: Arc<dyn GitCloner>,
        credentials: CredentialPolicy,
        secret_masker: SecretMasker,
    ) -> Self {
        Self {
            cache_root: cache_root.into(),
            cloner,
            credentials,
            secret_masker,
            key_locks: DashMap::new(),
            fetched: DashSet::new(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn credentials(&self) -> &CredentialPolicy {
        &self.credentials
    }

    /// `<cache_root>/<safe(uses)>`. Pure.
    pub fn resolve_cache_dir(&self, uses: &str) -> PathBuf {
        self.cache_root.join(StringUtil::safe_filename(uses))
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Populate the entry for `uses` with `reference` at its pinned ref.
    ///
    /// Idempotent within a run: once an entry was fetched, later calls
    /// return [`FetchStatus::AlreadyFetched`] without touching git.
    pub async fn fetch(
        &self,
        reference: &ActionReference,
        uses: &str,
        cancel: CancellationToken,
    ) -> Result<FetchResult, ActionError> {
        let key = StringUtil::safe_filename(uses);
        let cache_dir = self.cache_root.join(&key);

        if self.fetched.contains(&key) {
            return Ok(FetchResult {
                cache_dir,
                status: FetchStatus::AlreadyFetched,
            });
        }

        let key_lock = self.key_lock(&key);
        let _guard = tokio::select! {
            guard = key_lock.lock() => guard,
            _ = cancel.cancelled() => return Err(ActionError::Cancelled),
        };
        if self.fetched.contains(&key) {
            return Ok(FetchResult {
                cache_dir,
                status: FetchStatus::AlreadyFetched,
            });
        }

        let locks_dir = self.cache_root.join(paths::CACHE_LOCK_DIRECTORY);
        fs::create_dir_all(&locks_dir).map_err(|e| {
            ActionError::Fetch(anyhow::Error::new(e).context(format!(
                "Failed to create cache lock directory '{}'",
                locks_dir.display()
            )))
        })?;
        let _file_lock = EntryLock::acquire(&locks_dir.join(format!("{}.lock", key)), &cancel).await?;

        let target = self.credentials.resolve(reference);
        if let Some(token) = &target.token {
            self.secret_masker.add_token(token);
        }
        tracing::info!(
            "Fetching '{}' from {} ({})",
            uses,
            target.url,
            if target.token.is_some() { "authenticated" } else { "anonymous" }
        );

        let marker = locks_dir.join(format!("{}.incomplete", key));
        if marker.exists() {
            tracing::warn!("Discarding incomplete cache entry '{}'", cache_dir.display());
            IOUtil::delete_directory(&cache_dir).map_err(ActionError::Fetch)?;
            remove_marker(&marker);
        }

        let status = if cache_dir.is_dir() {
            self.update_in_place(reference, uses, &target, &cache_dir, &marker, &cancel)
                .await?
        } else {
            self.clone_fresh(reference, uses, &target, &cache_dir, &cancel).await?;
            FetchStatus::Cloned
        };

        self.fetched.insert(key);
        Ok(FetchResult { cache_dir, status })
    }

    async fn update_in_place(
        &self,
        reference: &ActionReference,
        uses: &str,
        target: &CloneTarget,
        cache_dir: &Path,
        marker: &Path,
        cancel: &CancellationToken,
    ) -> Result<FetchStatus, ActionError> {
        fs::write(marker, uses.as_bytes()).map_err(|e| ActionError::Fetch(e.into()))?;
        let input = clone_input(reference, target, cache_dir);
        match self.cloner.clone_repository(&input, cancel.clone()).await {
            Ok(()) => {
                remove_marker(marker);
                Ok(FetchStatus::Updated)
            }
            Err(CloneError::FastForwardRequired { message, .. }) => {
                // The tree was left as it was before the update.
                remove_marker(marker);
                Ok(FetchStatus::Stale { message })
            }
            Err(err) => Err(map_clone_error(err, uses, reference)),
        }
    }

    async fn clone_fresh(
        &self,
        reference: &ActionReference,
        uses: &str,
        target: &CloneTarget,
        cache_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let staging = tempfile::Builder::new()
            .prefix(paths::CACHE_STAGING_PREFIX)
            .tempdir_in(&self.cache_root)
            .map_err(|e| ActionError::Fetch(e.into()))?;

        let input = clone_input(reference, target, staging.path());
        if let Err(err) = self.cloner.clone_repository(&input, cancel.clone()).await {
            // Dropping `staging` removes the partial clone.
            return Err(map_clone_error(err, uses, reference));
        }

        if cache_dir.exists() {
            tracing::debug!(
                "Cache entry '{}' appeared during clone; keeping the existing one",
                cache_dir.display()
            );
            return Ok(());
        }
        fs::rename(staging.path(), cache_dir).map_err(|e| {
            ActionError::Fetch(anyhow::Error::new(e).context(format!(
                "Failed to move clone into '{}'",
                cache_dir.display()
            )))
        })
    }
}

fn clone_input(reference: &ActionReference, target: &CloneTarget, dir: &Path) -> CloneInput {
    CloneInput {
        url: target.url.clone(),
        git_ref: reference.git_ref.clone(),
        dir: dir.to_path_buf(),
        token: target.token.clone(),
    }
}

fn map_clone_error(err: CloneError, uses: &str, reference: &ActionReference) -> ActionError {
    match err {
        CloneError::ShortRef { commit, .. } => ActionError::ShortReference {
            uses: uses.to_string(),
            git_ref: reference.git_ref.clone(),
            commit,
        },
        CloneError::Cancelled => ActionError::Cancelled,
        CloneError::FastForwardRequired { git_ref, message } => ActionError::Fetch(anyhow::anyhow!(
            "Unable to fast-forward '{}': {}",
            git_ref,
            message
        )),
        CloneError::Other(err) => ActionError::Fetch(err),
    }
}

fn remove_marker(marker: &Path) {
    if let Err(e) = fs::remove_file(marker) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove '{}': {}", marker.display(), e);
        }
    }
}

/// Exclusive cross-process lock on one cache entry. Released on drop.
struct EntryLock {
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<fs::File>,
}

impl EntryLock {
    #[cfg(unix)]
    async fn acquire(path: &Path, cancel: &CancellationToken) -> Result<Self, ActionError> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        let mut file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| ActionError::Fetch(e.into()))?;
        loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(lock) => return Ok(Self { _lock: lock }),
                Err((returned, Errno::EWOULDBLOCK)) => {
                    file = returned;
                    tracing::debug!("Waiting for cache lock '{}'", path.display());
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ActionError::Cancelled),
                        _ = tokio::time::sleep(LOCK_RETRY_INTERVAL) => {}
                    }
                }
                Err((_, errno)) => {
                    return Err(ActionError::Fetch(anyhow::anyhow!(
                        "Failed to lock '{}': {}",
                        path.display(),
                        errno
                    )))
                }
            }
        }
    }

    #[cfg(not(unix))]
    async fn acquire(_path: &Path, _cancel: &CancellationToken) -> Result<Self, ActionError> {
        Ok(Self {})
    }
}
