// action-worker: resolution, caching and lifecycle execution of remote action steps.
// Depends on `action-sdk` and `action-common`.
//
// Architecture:
//   Worker::run_job → StepsRunner::run_all → Step::prepare / Step::run
//     → RemoteActionStep: ActionReference → ActionCache::fetch → ActionManifestManager
//     → ActionHandler (node) or CompositeContext (nested steps)

pub mod action_cache;
pub mod action_manifest_manager;
pub mod action_reference;
pub mod composite;
pub mod execution_context;
pub mod expressions;
pub mod file_command_manager;
pub mod git;
pub mod github_context;
pub mod handlers;
pub mod job;
pub mod step;
pub mod step_action_remote;
pub mod steps_context;
pub mod steps_runner;
pub mod worker;
