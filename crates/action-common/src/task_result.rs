// Step and job results, and their mapping to process return codes.

use serde::{Deserialize, Serialize};

/// Offset added to a `TaskResult` to form the worker's exit code.
pub const RETURN_CODE_OFFSET: i32 = 100;

/// Outcome of a step stage or of a whole job.
///
/// Variants are ordered by severity; see [`TaskResult::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResult {
    Succeeded = 0,
    Failed = 2,
    Canceled = 3,
    Skipped = 4,
}

impl TaskResult {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(TaskResult::Succeeded),
            2 => Some(TaskResult::Failed),
            3 => Some(TaskResult::Canceled),
            4 => Some(TaskResult::Skipped),
            _ => None,
        }
    }

    /// Merge `coming` into `current`, keeping the worse result.
    ///
    /// Once a result is worse than `Failed` it sticks.
    pub fn merge(current: Option<TaskResult>, coming: TaskResult) -> TaskResult {
        match current {
            None => coming,
            Some(current) if current > TaskResult::Failed => current,
            Some(current) if coming >= current => coming,
            Some(current) => current,
        }
    }

    /// The value exposed as `steps.<id>.outcome`.
    pub fn as_outcome(self) -> &'static str {
        match self {
            TaskResult::Succeeded => "success",
            TaskResult::Failed => "failure",
            TaskResult::Canceled => "cancelled",
            TaskResult::Skipped => "skipped",
        }
    }

    pub fn to_return_code(self) -> i32 {
        RETURN_CODE_OFFSET + self as i32
    }

    /// Unknown codes map to `Failed`.
    pub fn from_return_code(code: i32) -> TaskResult {
        TaskResult::from_i32(code - RETURN_CODE_OFFSET).unwrap_or(TaskResult::Failed)
    }
}

impl std::fmt::Display for TaskResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskResult::Succeeded => write!(f, "Succeeded"),
            TaskResult::Failed => write!(f, "Failed"),
            TaskResult::Canceled => write!(f, "Canceled"),
            TaskResult::Skipped => write!(f, "Skipped"),
        }
    }
}
