//! Execution status state machine

use serde::{Deserialize, Serialize};

/// Possible states of an execution
///
/// `Running` is the only non-terminal state; every other state is reached
/// at most once and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Process is (or is believed to be) alive
    Running,

    /// Exited with code 0
    Completed,

    /// Exited with a non-zero code, or could not be spawned
    Failed,

    /// Terminated on request
    Cancelled,
}

impl ExecutionStatus {
    /// Status for a process that exited with `code`
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        }
    }

    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        !self.is_running()
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ExecutionStatus::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
