// action-common: Shared services and infrastructure for the remote action step runner.
// Depends only on `action-sdk`.

pub mod config_store;
pub mod constants;
pub mod errors;
pub mod logging;
pub mod secret_masker;
pub mod task_result;

// ---------------------------------------------------------------------------
// Re-exports for convenient access
// ---------------------------------------------------------------------------

pub use config_store::{ConfigurationStore, RunnerSettings};
pub use errors::ActionError;
pub use secret_masker::SecretMasker;
pub use task_result::TaskResult;
