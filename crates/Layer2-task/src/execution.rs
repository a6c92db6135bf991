//! Execution record and types

use crate::channel::ProcessHandle;
use crate::state::ExecutionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tether_foundation::{OutputBuffer, OutputSnapshot, ShellOverride, TaskDefinition};
use uuid::Uuid;

/// Notice stored in place of captured output for interactive executions
pub const INTERACTIVE_OUTPUT_NOTICE: &str =
    "[interactive task: output is shown in the attached terminal and not captured]";

/// Unique identifier for one execution; never reused
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Build an id from a monotonically increasing sequence number
    pub fn generate(seq: u64) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self(format!("exec-{}-{}", seq, &uuid[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ExecutionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Start options
// ============================================================================

/// Everything needed to start one execution
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Shell override; platform default when `None`
    pub shell: Option<ShellOverride>,
    /// Output Buffer capacity override
    pub output_capacity: Option<usize>,
    pub interactive: bool,
    pub background: bool,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_shell(mut self, shell: ShellOverride) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn with_output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = Some(capacity);
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }
}

impl From<&TaskDefinition> for StartOptions {
    fn from(task: &TaskDefinition) -> Self {
        Self {
            cwd: task.cwd.clone(),
            env: task.env.clone(),
            shell: None,
            output_capacity: task.output_capacity,
            interactive: task.interactive,
            background: task.background,
        }
    }
}

// ============================================================================
// Execution
// ============================================================================

/// One run of a task
#[derive(Debug, Clone)]
pub struct Execution {
    pub id: ExecutionId,
    /// Start order; ids embed it but do not sort by it
    pub seq: u64,
    pub label: String,
    /// Resolved command line
    pub command: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub output: OutputBuffer,
    pub interactive: bool,
    pub background: bool,
    /// Process handle assigned at start
    pub handle: ProcessHandle,
    /// Terminal-task-ended notification seen
    pub task_ended: bool,
}

impl Execution {
    pub(crate) fn new(
        seq: u64,
        label: impl Into<String>,
        command: impl Into<String>,
        handle: ProcessHandle,
        options: &StartOptions,
        default_capacity: usize,
    ) -> Self {
        let output = if options.interactive {
            OutputBuffer::placeholder(INTERACTIVE_OUTPUT_NOTICE)
        } else {
            OutputBuffer::with_override(options.output_capacity, default_capacity)
        };

        Self {
            id: ExecutionId::generate(seq),
            seq,
            label: label.into(),
            command: command.into(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            exit_code: None,
            output,
            interactive: options.interactive,
            background: options.background,
            handle,
            task_ended: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Append a chunk of output; ignored once the execution has settled
    pub(crate) fn append_output(&mut self, chunk: &str) -> bool {
        if !self.is_running() || self.interactive {
            return false;
        }
        self.output.push(chunk);
        true
    }

    /// Settle from a process exit. Returns `true` if this call settled it.
    ///
    /// A later exit notification only fills in a missing exit code; status
    /// and end time are never overwritten.
    pub(crate) fn settle_exit(&mut self, exit_code: i32) -> bool {
        if self.is_running() {
            self.status = ExecutionStatus::from_exit_code(exit_code);
            self.exit_code = Some(exit_code);
            self.ended_at = Some(Utc::now());
            return true;
        }
        if self.exit_code.is_none() && self.status != ExecutionStatus::Cancelled {
            self.exit_code = Some(exit_code);
        }
        false
    }

    /// Record a terminal-task-ended notification.
    ///
    /// Carries no exit code, so it never settles; the process-ended
    /// notification decides the status whichever arrives first.
    pub(crate) fn mark_task_ended(&mut self) -> bool {
        let first = !self.task_ended;
        self.task_ended = true;
        first
    }

    /// Mark cancelled. Returns `false` if already settled.
    pub(crate) fn cancel(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.status = ExecutionStatus::Cancelled;
        self.ended_at = Some(Utc::now());
        true
    }

    /// Wall time from start to end (or now)
    pub fn duration(&self) -> Duration {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            id: self.id.clone(),
            label: self.label.clone(),
            command: self.command.clone(),
            status: self.status,
            started_at: self.started_at,
            ended_at: self.ended_at,
            exit_code: self.exit_code,
            interactive: self.interactive,
            background: self.background,
            duration_ms: self.duration().as_millis() as u64,
            output_bytes: self.output.offered(),
            output_truncated: self.output.is_truncated(),
        }
    }

    pub fn output_snapshot(&self) -> OutputSnapshot {
        self.output.snapshot()
    }
}

/// Read-only view of an execution returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub id: ExecutionId,
    pub label: String,
    pub command: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub interactive: bool,
    pub background: bool,
    pub duration_ms: u64,
    /// Bytes of output offered so far, including anything dropped
    pub output_bytes: usize,
    pub output_truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(options: StartOptions) -> Execution {
        Execution::new(
            1,
            "build",
            "make",
            ProcessHandle::next(),
            &options,
            64,
        )
    }

    #[test]
    fn test_execution_id_format() {
        let a = ExecutionId::generate(1);
        let b = ExecutionId::generate(1);
        assert!(a.as_str().starts_with("exec-1-"));
        assert_ne!(a, b);
        assert_eq!(execution(StartOptions::new()).seq, 1);
    }

    #[test]
    fn test_settle_exit_once() {
        let mut exec = execution(StartOptions::new());
        assert!(exec.settle_exit(0));
        let ended = exec.ended_at;

        assert!(!exec.settle_exit(0));
        assert!(!exec.settle_exit(3));
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.exit_code, Some(0));
        assert_eq!(exec.ended_at, ended);
    }

    #[test]
    fn test_cancel_then_exit_keeps_cancelled() {
        let mut exec = execution(StartOptions::new());
        assert!(exec.cancel());
        assert!(!exec.settle_exit(-1));
        assert_eq!(exec.status, ExecutionStatus::Cancelled);
        assert_eq!(exec.exit_code, None);
        assert!(!exec.cancel());
    }

    #[test]
    fn test_output_dropped_after_settle() {
        let mut exec = execution(StartOptions::new());
        assert!(exec.append_output("a"));
        exec.settle_exit(1);
        assert!(!exec.append_output("b"));
        assert_eq!(exec.output.content(), "a");
        assert_eq!(exec.status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_task_ended_waits_for_exit_code() {
        let mut exec = execution(StartOptions::new().interactive());
        assert_eq!(exec.output.content(), INTERACTIVE_OUTPUT_NOTICE);
        assert!(!exec.append_output("ignored"));

        assert!(exec.mark_task_ended());
        assert!(!exec.mark_task_ended());
        assert!(exec.is_running());
        assert_eq!(exec.ended_at, None);

        assert!(exec.settle_exit(1));
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.exit_code, Some(1));
    }

    #[test]
    fn test_task_ended_after_exit_keeps_status() {
        let mut exec = execution(StartOptions::new());
        exec.settle_exit(0);
        exec.mark_task_ended();
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(exec.task_ended);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let exec = execution(StartOptions::new());
        let json = serde_json::to_value(exec.snapshot()).unwrap();
        assert_eq!(json["status"], "running");
        assert!(json.get("startedAt").is_some());
        assert!(json.get("exitCode").is_none());
    }
}
