//! # tether-foundation
//!
//! Foundation layer for Tether:
//! - Error: shared error taxonomy
//! - Config: engine settings (EngineConfig) loaded through JsonStore
//! - Definition: task / debug configuration shapes and input substitution
//! - Output: bounded Output Buffer
//! - Wait: the poll-until-settled await primitive
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  tether-engine (runTask, startDebug, ...)    │
//! │        │                         │           │
//! │        ▼                         ▼           │
//! │  tether-task               tether-debug      │
//! │  (executions)              (sessions)        │
//! │        └──────────┬──────────────┘           │
//! │                   ▼                          │
//! │  tether-foundation (Output, Wait, Config)    │
//! └──────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod definition;
pub mod error;
pub mod output;
pub mod storage;
pub mod wait;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{AdapterCommand, EngineConfig, ShellOverride, ENGINE_CONFIG_FILE};

// ============================================================================
// Definitions
// ============================================================================
pub use definition::{
    substitute_inputs, substitute_value, DebugConfiguration, InputValues, RequestKind,
    TaskDefinition, INTERNAL_CONSOLE, TERMINAL_CONSOLES,
};

// ============================================================================
// Output / Wait
// ============================================================================
pub use output::{OutputBuffer, OutputSnapshot, DEFAULT_OUTPUT_CAPACITY, TRUNCATION_NOTICE};
pub use wait::{poll_until, PollSettings, Probe, WaitOutcome};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{JsonStore, HOME_ENV, PROJECT_DIR};
