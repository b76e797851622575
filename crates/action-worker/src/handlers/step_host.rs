// Execution target for steps: runs processes and translates paths into the
// environment the step executes in.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use action_common::ActionError;
use action_sdk::{IOUtil, ProcessInvoker, ProcessOutput, ProcessStartInfo};

/// Where step processes run.
///
/// `DefaultStepHost` runs processes directly on the host.
#[async_trait]
pub trait StepHost: Send + Sync {
    /// Translate a host path into the path the step sees.
    fn to_target_path(&self, host_path: &Path) -> PathBuf;

    /// Copy `source` (a host path) into `destination` (a target path).
    async fn copy_directory(
        &self,
        destination: &Path,
        source: &Path,
        respect_ignore_file: bool,
        cancel_token: CancellationToken,
    ) -> Result<()>;

    /// Run a process to completion.
    async fn execute(
        &self,
        info: &ProcessStartInfo,
        cancel_token: CancellationToken,
    ) -> Result<ProcessOutput>;
}

/// Default step host - runs processes directly on the host OS.
#[derive(Debug, Clone)]
pub struct DefaultStepHost {
    invoker: ProcessInvoker,
}

impl DefaultStepHost {
    pub fn new() -> Self {
        Self {
            invoker: ProcessInvoker::new("step_host"),
        }
    }
}

impl Default for DefaultStepHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepHost for DefaultStepHost {
    fn to_target_path(&self, host_path: &Path) -> PathBuf {
        host_path.to_path_buf()
    }

    async fn copy_directory(
        &self,
        destination: &Path,
        source: &Path,
        respect_ignore_file: bool,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        // Copying a directory onto itself is a no-op on the host.
        if let (Ok(src), Ok(dst)) = (source.canonicalize(), destination.canonicalize()) {
            if src == dst {
                tracing::debug!(target: "step_host", "Skipping copy of '{}' onto itself", src.display());
                return Ok(());
            }
        }
        let src = source.to_path_buf();
        let dst = destination.to_path_buf();
        let copy = tokio::task::spawn_blocking(move || {
            IOUtil::copy_directory(&src, &dst, respect_ignore_file)
        });

        let copied = tokio::select! {
            result = copy => result.context("Copy task panicked")??,
            _ = cancel_token.cancelled() => return Err(ActionError::Cancelled.into()),
        };
        tracing::debug!(
            target: "step_host",
            "Copied {} file(s) from '{}' to '{}'",
            copied,
            source.display(),
            destination.display()
        );
        Ok(())
    }

    async fn execute(
        &self,
        info: &ProcessStartInfo,
        cancel_token: CancellationToken,
    ) -> Result<ProcessOutput> {
        self.invoker
            .execute(info, cancel_token)
            .await
            .with_context(|| format!("Process execution failed: '{}'", info.file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_directory() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/b.txt"), "b").unwrap();

        let target = dst.path().join("out");
        DefaultStepHost::new()
            .copy_directory(&target, src.path(), false, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(target.join("sub/b.txt")).unwrap(), "b");
    }

    #[tokio::test]
    async fn test_copy_onto_itself_is_noop() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), "a").unwrap();
        DefaultStepHost::new()
            .copy_directory(src.path(), src.path(), true, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(src.path().join("a.txt")).unwrap(), "a");
    }

    #[tokio::test]
    async fn test_copy_into_own_subdirectory() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), "a").unwrap();
        let nested = src.path().join("checkout");
        DefaultStepHost::new()
            .copy_directory(&nested, src.path(), false, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(nested.join("a.txt")).unwrap(), "a");
        assert!(!nested.join("checkout").exists());
    }

    #[test]
    fn test_target_path_is_identity() {
        let host = DefaultStepHost::new();
        assert_eq!(host.to_target_path(Path::new("/a/b")), PathBuf::from("/a/b"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute() {
        let info = ProcessStartInfo::new("sh").args(["-c", "echo hi"]);
        let output = DefaultStepHost::new()
            .execute(&info, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.stdout_text(), "hi");
    }
}
