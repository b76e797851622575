// Entry point for the action worker process.
//
// Runs one job file: every step's pre stage, then main, then post. The exit
// code encodes the job's `TaskResult`.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use action_common::{ConfigurationStore, TaskResult};
use action_worker::job::JobDefinition;
use action_worker::worker::{RunInfo, Worker};

/// Command-line arguments for the worker process.
#[derive(Parser, Debug)]
#[command(name = "action-worker", about = "Runs workflow steps that use remote actions")]
struct Args {
    /// Job file with `env` and `steps`.
    #[arg(long)]
    job: PathBuf,

    /// JSON settings file. Missing means defaults.
    #[arg(long, default_value = ".runner-settings.json")]
    config: PathBuf,

    /// Workspace the steps run in; overrides the settings file.
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Action cache root; overrides the settings file.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// `org/repo` the workspace holds.
    #[arg(long, default_value = "")]
    repository: String,

    /// Ref the workspace holds, e.g. `refs/heads/main`.
    #[arg(long = "ref", default_value = "")]
    git_ref: String,

    #[arg(long, default_value = "https://github.com")]
    server_url: String,

    /// Enable debug output.
    #[arg(long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to build Tokio runtime: {}", e);
            std::process::exit(TaskResult::Failed.to_return_code());
        }
    };

    let exit_code = runtime.block_on(async move { run(args).await });
    std::process::exit(exit_code);
}

async fn run(args: Args) -> i32 {
    match run_job(args).await {
        Ok(result) => {
            let return_code = result.to_return_code();
            tracing::info!("Worker completed with result {} (return code {})", result, return_code);
            return_code
        }
        Err(e) => {
            tracing::error!("Worker failed with error: {:#}", e);
            eprintln!("Error: {:#}", e);
            TaskResult::Failed.to_return_code()
        }
    }
}

async fn run_job(args: Args) -> Result<TaskResult> {
    let mut settings = ConfigurationStore::new(&args.config).load()?;
    if let Some(workdir) = args.workdir {
        settings.workdir = workdir;
    }
    if let Some(cache_dir) = args.cache_dir {
        settings.action_cache_dir = cache_dir;
    }
    settings.write_debug |= args.debug;
    settings.workdir = std::fs::canonicalize(&settings.workdir)
        .with_context(|| format!("Workspace '{}' does not exist", settings.workdir.display()))?;

    action_common::logging::init(settings.json_logs, settings.write_debug)?;
    tracing::info!("Worker process starting.");
    tracing::info!("  job       = {}", args.job.display());
    tracing::info!("  workdir   = {}", settings.workdir.display());
    tracing::info!("  cache dir = {}", settings.action_cache_dir.display());

    let job = JobDefinition::load(&args.job)?;
    let run = RunInfo {
        repository: args.repository,
        git_ref: args.git_ref,
        server_url: args.server_url,
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    Worker::from_settings(settings).run_job(&job, &run, cancel).await
}

/// Cancel the job on Ctrl-C or SIGTERM.
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                cancel.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::warn!("Received shutdown signal, cancelling the job");
    cancel.cancel();
}
