//! # tether-task
//!
//! Task execution for Tether.
//! Runs shell commands as child processes and tracks each run as an
//! execution with a bounded output buffer.
//!
//! ## Features
//!
//! - Captured or terminal-attached (interactive) executions
//! - Status, output, cancel and timeout-bounded await
//! - Serialized lifecycle handling through a single dispatcher
//! - Idempotent settlement when exit notifications duplicate or reorder

pub mod channel;
pub mod execution;
pub mod registry;
pub mod state;

pub use channel::{
    ChannelControl, ChannelEvent, ChannelRequest, EventSink, LocalChannel, ProcessChannel,
    ProcessHandle, SENTINEL_EXIT_CODE,
};
pub use execution::{
    Execution, ExecutionId, ExecutionSnapshot, StartOptions, INTERACTIVE_OUTPUT_NOTICE,
};
pub use registry::{Resolution, TaskAwaitResult, TaskRegistry, TaskRegistryConfig};
pub use state::ExecutionStatus;
