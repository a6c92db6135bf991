//! Process channel trait and lifecycle notifications

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tether_foundation::ShellOverride;
use tokio::sync::mpsc;

/// Exit code reported for spawn failures, wait failures and signal deaths
pub const SENTINEL_EXIT_CODE: i32 = -1;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one spawned process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessHandle(pub u64);

impl ProcessHandle {
    /// Allocate a process-unique handle
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "proc#{}", self.0)
    }
}

/// Lifecycle notifications emitted by a channel
///
/// For one handle, every `Output` is sent before its `ProcessEnded`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A chunk of stdout or stderr text, in arrival order
    Output { handle: ProcessHandle, chunk: String },

    /// The process exited (or never started)
    ProcessEnded {
        handle: ProcessHandle,
        label: String,
        exit_code: i32,
    },

    /// The hosting terminal task ended; carries no exit code
    TaskEnded { handle: ProcessHandle, label: String },
}

impl ChannelEvent {
    pub fn handle(&self) -> ProcessHandle {
        match self {
            ChannelEvent::Output { handle, .. }
            | ChannelEvent::ProcessEnded { handle, .. }
            | ChannelEvent::TaskEnded { handle, .. } => *handle,
        }
    }
}

/// Sink for channel notifications
pub type EventSink = mpsc::UnboundedSender<ChannelEvent>;

/// One process to start
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    pub label: String,
    pub command_line: String,
    pub cwd: Option<PathBuf>,
    /// Layered over the inherited environment
    pub env: HashMap<String, String>,
    pub shell: Option<ShellOverride>,
    /// Pipe stdout/stderr back as `Output` events; otherwise inherit the terminal
    pub capture: bool,
}

/// Control over a started process
pub trait ChannelControl: Send + Sync {
    /// Request termination. Idempotent; a no-op once the process is gone.
    fn close(&self);
}

/// Channel trait - implement to add new process backends
///
/// `open` never fails: a process that cannot be started is reported as a
/// `ProcessEnded` with [`SENTINEL_EXIT_CODE`] through `events`.
pub trait ProcessChannel: Send + Sync {
    fn open(
        &self,
        handle: ProcessHandle,
        request: ChannelRequest,
        events: EventSink,
    ) -> Box<dyn ChannelControl>;

    /// Get channel name
    fn name(&self) -> &'static str;
}
