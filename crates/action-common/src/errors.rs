//! Error types for action resolution and execution.
//!
//! [`ActionError`] covers the failures a step can hit while its action is
//! parsed, fetched, loaded and run. Orchestration code carries these inside
//! `anyhow::Error`; use [`ActionError::find`] to recover the typed value.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    /// The uses string does not follow `[scheme://host/]org/repo[/path]@ref`.
    #[error("Expected format {{org}}/{{repo}}[/path]@ref. Actual '{uses}' Input string was not in a correct format")]
    Parse { uses: String },

    /// The pinned ref is an abbreviated commit id.
    #[error("Unable to resolve action `{uses}`, the provided ref `{git_ref}` is the shortened version of a commit SHA, which is not supported. Please use the full commit SHA `{commit}` instead")]
    ShortReference {
        uses: String,
        git_ref: String,
        commit: String,
    },

    /// Any other clone failure, passed through untouched.
    #[error(transparent)]
    Fetch(anyhow::Error),

    /// The action descriptor is missing or malformed.
    #[error("Failed to load action definition from '{path}': {message}")]
    Load { path: PathBuf, message: String },

    /// The expression collaborator rejected an expression.
    #[error("Failed to evaluate expression '{expression}': {message}")]
    Interpolation { expression: String, message: String },

    #[error("Composite action depth exceeded maximum of {max}.")]
    MaxDepthExceeded { max: u32 },

    #[error("Unsupported action: {message}")]
    Unsupported { message: String },

    #[error("The operation was cancelled.")]
    Cancelled,
}

impl ActionError {
    /// Find an `ActionError` anywhere in an error chain.
    pub fn find(err: &anyhow::Error) -> Option<&ActionError> {
        err.chain().find_map(|cause| cause.downcast_ref::<ActionError>())
    }

    /// Whether the chain ends in a cancellation.
    pub fn is_cancelled(err: &anyhow::Error) -> bool {
        matches!(Self::find(err), Some(ActionError::Cancelled))
    }
}
