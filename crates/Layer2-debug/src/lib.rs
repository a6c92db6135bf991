//! # tether-debug
//!
//! Debug session tracking for Tether.
//! Talks to debug adapters over the Content-Length framed JSON protocol and
//! keeps one session record per launch/attach.
//!
//! ## Features
//!
//! - Session state machine driven by adapter events
//! - Shared breakpoint set, pushed to every configured session
//! - Stack, variable and evaluate requests gated on the paused state
//! - Timeout-bounded await for pause/termination

pub mod breakpoints;
pub mod event;
pub mod inspect;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;

pub use breakpoints::{normalize_path, set_breakpoints_arguments, Breakpoint, BreakpointStore};
pub use event::{DebugEvent, TELEMETRY_CATEGORY};
pub use inspect::{EvaluateResult, ScopeVariables, StackFrameInfo, VariableInfo};
pub use manager::{
    ContinueResult, DebugManager, FrameVariables, StackTrace, StartDebugResult,
    DISCONNECT_TIMEOUT, EXITED_DRAIN,
};
pub use registry::{
    DebugAwaitResult, DebugRegistryConfig, DebugSessionRegistry, SessionEvent,
    SessionEventSink, DEFAULT_SESSION_RETENTION,
};
pub use session::{
    DebugSession, ExceptionInfo, SessionId, SessionSnapshot, SessionState, SessionStatus,
};
pub use transport::{
    AdapterConnection, DebugBackend, DebugTransport, StdioBackend, StdioTransport,
    DEFAULT_REQUEST_TIMEOUT,
};
