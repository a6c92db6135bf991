//! Config - engine settings
//!
//! - `engine.rs` - EngineConfig, shell override, adapter commands

mod engine;

pub use engine::{AdapterCommand, EngineConfig, ShellOverride, ENGINE_CONFIG_FILE};
