use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The duration to wait after sending SIGINT before killing the process.
const SIGINT_TIMEOUT: Duration = Duration::from_millis(7500);

/// Error type for non-zero process exit codes.
#[derive(Debug, thiserror::Error)]
#[error(
    "Exit code {exit_code} returned from process: file name '{file_name}', arguments '{arguments}'."
)]
pub struct ProcessExitCodeError {
    pub exit_code: i32,
    pub file_name: String,
    pub arguments: String,
    pub stderr: String,
}

/// Error returned when the cancellation token fired before the process exited.
#[derive(Debug, thiserror::Error)]
#[error("Process '{file_name}' was cancelled.")]
pub struct ProcessCancelledError {
    pub file_name: String,
}

/// Everything needed to start a child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessStartInfo {
    pub file_name: String,
    pub arguments: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub environment: HashMap<String, String>,
}

impl ProcessStartInfo {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &HashMap<String, String>) -> Self {
        for (k, v) in vars {
            self.environment.insert(k.clone(), v.clone());
        }
        self
    }

    /// Arguments joined for display. Never contains environment values.
    pub fn display_arguments(&self) -> String {
        self.arguments.join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }

    /// Turn a non-zero exit into a [`ProcessExitCodeError`].
    pub fn ensure_success(self, info: &ProcessStartInfo) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(ProcessExitCodeError {
            exit_code: self.exit_code,
            file_name: info.file_name.clone(),
            arguments: info.display_arguments(),
            stderr: self.stderr_text(),
        }
        .into())
    }
}

/// Spawns a child process, drains stdout/stderr on separate tasks and
/// supports cancellation (SIGINT, then kill).
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker {
    /// Tracing target used for process output lines.
    target_name: String,
}

impl ProcessInvoker {
    pub fn new(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
        }
    }

    /// Run the process to completion and capture its output.
    ///
    /// A non-zero exit code is not an error here; use
    /// [`ProcessOutput::ensure_success`] when it should be. Cancellation
    /// returns [`ProcessCancelledError`].
    pub async fn execute(
        &self,
        info: &ProcessStartInfo,
        cancellation_token: CancellationToken,
    ) -> Result<ProcessOutput> {
        anyhow::ensure!(!info.file_name.is_empty(), "file_name must not be empty");
        if cancellation_token.is_cancelled() {
            return Err(ProcessCancelledError {
                file_name: info.file_name.clone(),
            }
            .into());
        }

        tracing::debug!(
            "[{}] Starting process '{}' with arguments '{}' in '{}'",
            self.target_name,
            info.file_name,
            info.display_arguments(),
            info.working_directory
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        );

        let mut cmd = Command::new(&info.file_name);
        cmd.args(&info.arguments);
        if let Some(ref dir) = info.working_directory {
            cmd.current_dir(dir);
        }
        cmd.envs(&info.environment);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd.spawn().with_context(|| {
            format!(
                "Failed to start process '{}' with arguments '{}'",
                info.file_name,
                info.display_arguments()
            )
        })?;
        let pid = child.id().unwrap_or(0);

        let stdout_task = spawn_line_reader(child.stdout.take(), self.target_name.clone(), "stdout");
        let stderr_task = spawn_line_reader(child.stderr.take(), self.target_name.clone(), "stderr");

        let exit_code = tokio::select! {
            status = child.wait() => {
                status.context("Failed to wait for process")?.code().unwrap_or(-1)
            }
            _ = cancellation_token.cancelled() => {
                tracing::info!("[{}] Cancellation requested for process {}.", self.target_name, pid);
                cancel_and_kill_process(&mut child).await;
                // Grandchildren may still hold the pipes open.
                stdout_task.abort();
                stderr_task.abort();
                return Err(ProcessCancelledError {
                    file_name: info.file_name.clone(),
                }
                .into());
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        tracing::debug!(
            "[{}] Finished process {} with exit code {}, and elapsed time {:.2?}.",
            self.target_name,
            pid,
            exit_code,
            start.elapsed()
        );

        Ok(ProcessOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

fn spawn_line_reader<R>(
    stream: Option<R>,
    target_name: String,
    stream_name: &'static str,
) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut collected = Vec::new();
        if let Some(stream) = stream {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!("[{}:{}] {}", target_name, stream_name, line);
                collected.push(line);
            }
        }
        collected
    })
}

/// Ask the process to stop with SIGINT, then kill it if it ignores the signal.
async fn cancel_and_kill_process(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let sent = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGINT,
            );
            if sent.is_ok() {
                if let Ok(Ok(_)) = tokio::time::timeout(SIGINT_TIMEOUT, child.wait()).await {
                    return;
                }
            }
        }
    }

    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let invoker = ProcessInvoker::new("test");
        let info = ProcessStartInfo::new("sh").args(["-c", "echo hello; echo oops 1>&2; exit 3"]);
        let output = invoker
            .execute(&info, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, vec!["hello".to_string()]);
        assert_eq!(output.stderr_text(), "oops");
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ensure_success_reports_exit_code() {
        let invoker = ProcessInvoker::new("test");
        let info = ProcessStartInfo::new("sh").args(["-c", "exit 2"]);
        let output = invoker
            .execute(&info, CancellationToken::new())
            .await
            .unwrap();
        let err = output.ensure_success(&info).unwrap_err();
        let exit = err.downcast_ref::<ProcessExitCodeError>().unwrap();
        assert_eq!(exit.exit_code, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn environment_is_passed_to_child() {
        let invoker = ProcessInvoker::new("test");
        let info = ProcessStartInfo::new("sh")
            .args(["-c", "echo $GREETING"])
            .env("GREETING", "hi there");
        let output = invoker
            .execute(&info, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.stdout_text(), "hi there");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_stops_process() {
        let invoker = ProcessInvoker::new("test");
        let info = ProcessStartInfo::new("sleep").arg("30");
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let err = invoker.execute(&info, token).await.unwrap_err();
        assert!(err.downcast_ref::<ProcessCancelledError>().is_some());
    }

    #[tokio::test]
    async fn missing_executable_is_an_error() {
        let invoker = ProcessInvoker::new("test");
        let info = ProcessStartInfo::new("definitely-not-a-real-binary-xyz");
        assert!(invoker.execute(&info, CancellationToken::new()).await.is_err());
    }
}
