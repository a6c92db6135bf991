//! Debug session record and state machine
//!
//! `initializing -> running <-> paused -> terminated`, with `terminated`
//! absorbing. Adapter events are applied in arrival order; an event whose
//! precondition does not hold is ignored.

use crate::event::{DebugEvent, TELEMETRY_CATEGORY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_foundation::{OutputBuffer, OutputSnapshot, RequestKind};
use uuid::Uuid;

/// Stop reason that carries an exception descriptor
pub const EXCEPTION_REASON: &str = "exception";

/// Unique identifier for a debug session; never reused
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate(seq: u64) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self(format!("dbg-{}-{}", seq, &uuid[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Debug session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Adapter started, `initialized` not seen yet
    Initializing,
    /// Debuggee is running
    Running,
    /// Debuggee stopped (breakpoint, step, exception, ...)
    Paused,
    /// Session is over
    Terminated,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Terminated)
    }

    /// Await target: paused or terminated
    pub fn is_settled(&self) -> bool {
        matches!(self, SessionState::Paused | SessionState::Terminated)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Coarse lifecycle: everything before `terminated` is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Terminated,
}

impl From<SessionState> for SessionStatus {
    fn from(state: SessionState) -> Self {
        if state.is_active() {
            SessionStatus::Active
        } else {
            SessionStatus::Terminated
        }
    }
}

/// Exception recorded on an exception stop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One debug session
#[derive(Debug, Clone)]
pub struct DebugSession {
    pub id: SessionId,
    /// Start order, used to pick the current session
    pub seq: u64,
    /// Configuration name
    pub name: String,
    pub adapter_type: String,
    pub request: RequestKind,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<String>,
    /// Last stopped thread
    pub thread_id: Option<i64>,
    pub exception: Option<ExceptionInfo>,
    pub exit_code: Option<i64>,
    /// Terminal console swapped for the internal one at start
    pub console_overridden: bool,
    pub output: OutputBuffer,
}

impl DebugSession {
    pub fn new(
        id: SessionId,
        seq: u64,
        name: impl Into<String>,
        adapter_type: impl Into<String>,
        request: RequestKind,
        output: OutputBuffer,
        console_overridden: bool,
    ) -> Self {
        Self {
            id,
            seq,
            name: name.into(),
            adapter_type: adapter_type.into(),
            request,
            state: SessionState::Initializing,
            started_at: Utc::now(),
            ended_at: None,
            stop_reason: None,
            thread_id: None,
            exception: None,
            exit_code: None,
            console_overridden,
            output,
        }
    }

    /// Apply one adapter event. Returns `false` when it was ignored.
    pub fn apply(&mut self, event: &DebugEvent) -> bool {
        match event {
            DebugEvent::Initialized => {
                if self.state != SessionState::Initializing {
                    return false;
                }
                self.state = SessionState::Running;
                true
            }
            DebugEvent::Output { category, output } => {
                if category == TELEMETRY_CATEGORY {
                    return false;
                }
                self.output.push(output);
                true
            }
            DebugEvent::Stopped {
                reason,
                thread_id,
                description,
                text,
            } => {
                if !matches!(self.state, SessionState::Running | SessionState::Paused) {
                    return false;
                }
                self.state = SessionState::Paused;
                self.stop_reason = Some(reason.clone());
                self.thread_id = *thread_id;
                self.exception = (reason == EXCEPTION_REASON).then(|| ExceptionInfo {
                    identifier: text.clone().unwrap_or_else(|| EXCEPTION_REASON.to_string()),
                    description: description.clone(),
                });
                true
            }
            DebugEvent::Continued { .. } => {
                if self.state != SessionState::Paused {
                    return false;
                }
                self.state = SessionState::Running;
                self.stop_reason = None;
                self.thread_id = None;
                self.exception = None;
                true
            }
            DebugEvent::Exited { exit_code } => {
                if exit_code.is_some() {
                    self.exit_code = *exit_code;
                }
                self.terminate();
                true
            }
            DebugEvent::Terminated => {
                self.terminate();
                true
            }
            DebugEvent::Other(_) => false,
        }
    }

    /// Move to `terminated`; no-op if already there
    pub fn terminate(&mut self) -> bool {
        if self.state == SessionState::Terminated {
            return false;
        }
        self.state = SessionState::Terminated;
        self.ended_at = Some(Utc::now());
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            adapter_type: self.adapter_type.clone(),
            request: self.request,
            status: self.state.into(),
            state: self.state,
            started_at: self.started_at,
            ended_at: self.ended_at,
            stop_reason: self.stop_reason.clone(),
            thread_id: self.thread_id,
            exception: self.exception.clone(),
            exit_code: self.exit_code,
            console_overridden: self.console_overridden,
            output_bytes: self.output.offered(),
            output_truncated: self.output.is_truncated(),
        }
    }

    pub fn output_snapshot(&self) -> OutputSnapshot {
        self.output.snapshot()
    }
}

/// Read-only view of a session returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub name: String,
    #[serde(rename = "type")]
    pub adapter_type: String,
    pub request: RequestKind,
    pub status: SessionStatus,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    pub console_overridden: bool,
    pub output_bytes: usize,
    pub output_truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> DebugSession {
        DebugSession::new(
            SessionId::generate(1),
            1,
            "app",
            "lldb",
            RequestKind::Launch,
            OutputBuffer::new(64),
            false,
        )
    }

    fn stopped(reason: &str, thread_id: i64) -> DebugEvent {
        DebugEvent::Stopped {
            reason: reason.into(),
            thread_id: Some(thread_id),
            description: None,
            text: None,
        }
    }

    #[test]
    fn test_happy_path() {
        let mut s = session();
        assert!(s.apply(&DebugEvent::Initialized));
        assert_eq!(s.state, SessionState::Running);

        assert!(s.apply(&stopped("breakpoint", 1)));
        assert_eq!(s.state, SessionState::Paused);
        assert_eq!(s.thread_id, Some(1));
        assert_eq!(s.stop_reason.as_deref(), Some("breakpoint"));
        assert!(s.exception.is_none());

        assert!(s.apply(&DebugEvent::Continued { thread_id: Some(1) }));
        assert_eq!(s.state, SessionState::Running);
        assert_eq!(s.thread_id, None);
        assert_eq!(s.stop_reason, None);
    }

    #[test]
    fn test_ignored_preconditions() {
        let mut s = session();
        // Not running yet
        assert!(!s.apply(&stopped("breakpoint", 1)));
        assert!(!s.apply(&DebugEvent::Continued { thread_id: None }));
        assert_eq!(s.state, SessionState::Initializing);

        s.apply(&DebugEvent::Initialized);
        assert!(!s.apply(&DebugEvent::Initialized));
        assert!(!s.apply(&DebugEvent::Other("thread".into())));
    }

    #[test]
    fn test_stop_while_paused_updates_thread() {
        let mut s = session();
        s.apply(&DebugEvent::Initialized);
        s.apply(&stopped("breakpoint", 1));
        assert!(s.apply(&stopped("step", 2)));
        assert_eq!(s.thread_id, Some(2));
        assert_eq!(s.stop_reason.as_deref(), Some("step"));
    }

    #[test]
    fn test_exception_descriptor() {
        let mut s = session();
        s.apply(&DebugEvent::Initialized);
        s.apply(&DebugEvent::Stopped {
            reason: "exception".into(),
            thread_id: Some(3),
            description: Some("division by zero".into()),
            text: Some("ZeroDivisionError".into()),
        });
        assert_eq!(
            s.exception,
            Some(ExceptionInfo {
                identifier: "ZeroDivisionError".into(),
                description: Some("division by zero".into()),
            })
        );

        s.apply(&DebugEvent::Continued { thread_id: None });
        s.apply(&DebugEvent::Stopped {
            reason: "exception".into(),
            thread_id: Some(3),
            description: None,
            text: None,
        });
        assert_eq!(s.exception.as_ref().map(|e| e.identifier.as_str()), Some("exception"));
    }

    #[test]
    fn test_terminated_is_absorbing() {
        let mut s = session();
        s.apply(&DebugEvent::Initialized);
        assert!(s.apply(&DebugEvent::Exited { exit_code: Some(2) }));
        let ended = s.ended_at;
        assert_eq!(s.state, SessionState::Terminated);
        assert_eq!(s.exit_code, Some(2));

        s.apply(&DebugEvent::Terminated);
        assert!(!s.apply(&stopped("breakpoint", 1)));
        assert!(!s.apply(&DebugEvent::Initialized));
        assert_eq!(s.state, SessionState::Terminated);
        assert_eq!(s.ended_at, ended);
    }

    #[test]
    fn test_output_any_state() {
        let mut s = session();
        s.apply(&DebugEvent::Output {
            category: "stdout".into(),
            output: "a".into(),
        });
        s.apply(&DebugEvent::Terminated);
        s.apply(&DebugEvent::Output {
            category: "stderr".into(),
            output: "b".into(),
        });
        assert!(!s.apply(&DebugEvent::Output {
            category: "telemetry".into(),
            output: "{}".into(),
        }));
        assert_eq!(s.output.content(), "ab");
    }

    #[test]
    fn test_snapshot_json() {
        let mut s = session();
        let json = serde_json::to_value(s.snapshot()).unwrap();
        assert_eq!(json["state"], "initializing");
        assert_eq!(json["status"], "active");
        assert_eq!(json["type"], "lldb");
        assert_eq!(json["request"], "launch");

        s.apply(&DebugEvent::Initialized);
        s.apply(&stopped("breakpoint", 1));
        assert_eq!(s.snapshot().status, SessionStatus::Active);

        s.apply(&DebugEvent::Terminated);
        let json = serde_json::to_value(s.snapshot()).unwrap();
        assert_eq!(json["state"], "terminated");
        assert_eq!(json["status"], "terminated");
    }
}
