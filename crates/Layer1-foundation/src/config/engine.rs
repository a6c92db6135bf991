//! Engine Config - engine-wide settings
//!
//! Loaded from the global store and overlaid with the project store, the
//! same way every other settings file is handled.

use crate::output::DEFAULT_OUTPUT_CAPACITY;
use crate::storage::JsonStore;
use crate::wait::PollSettings;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Settings file name
pub const ENGINE_CONFIG_FILE: &str = "config.json";

// ============================================================================
// Engine Config
// ============================================================================

/// Tether engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Schema version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Output Buffer capacity when a definition has no override
    #[serde(default = "default_output_capacity")]
    pub default_output_capacity: usize,

    /// Await primitive poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Await timeout when the caller passes none
    #[serde(default = "default_await_timeout_ms")]
    pub default_await_timeout_ms: u64,

    /// How long terminated debug sessions stay readable
    #[serde(default = "default_session_retention_secs")]
    pub session_retention_secs: u64,

    /// Shell override, e.g. `"bash -lc"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Debug adapter executables by adapter type
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub adapters: HashMap<String, AdapterCommand>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            default_output_capacity: default_output_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            default_await_timeout_ms: default_await_timeout_ms(),
            session_retention_secs: default_session_retention_secs(),
            shell: None,
            adapters: HashMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Global + current project, project wins
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) = global.load_optional::<EngineConfig>(ENGINE_CONFIG_FILE)? {
                config.merge(global_config);
            }
        }

        if let Ok(project) = JsonStore::current_project() {
            if let Some(project_config) =
                project.load_optional::<EngineConfig>(ENGINE_CONFIG_FILE)?
            {
                config.merge(project_config);
            }
        }

        debug!(
            capacity = config.default_output_capacity,
            poll_ms = config.poll_interval_ms,
            "engine config loaded"
        );
        Ok(config)
    }

    /// Project settings only
    pub fn load_project(root: &Path) -> Result<Self> {
        let store = JsonStore::project(root);
        Ok(store
            .load_optional::<EngineConfig>(ENGINE_CONFIG_FILE)?
            .unwrap_or_default())
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Overlay `other` onto `self`; non-default values in `other` win
    pub fn merge(&mut self, other: EngineConfig) {
        if other.default_output_capacity != default_output_capacity() {
            self.default_output_capacity = other.default_output_capacity;
        }
        if other.poll_interval_ms != default_poll_interval_ms() {
            self.poll_interval_ms = other.poll_interval_ms;
        }
        if other.default_await_timeout_ms != default_await_timeout_ms() {
            self.default_await_timeout_ms = other.default_await_timeout_ms;
        }
        if other.session_retention_secs != default_session_retention_secs() {
            self.session_retention_secs = other.session_retention_secs;
        }
        if other.shell.is_some() {
            self.shell = other.shell;
        }
        self.adapters.extend(other.adapters);
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn default_output_capacity(mut self, capacity: usize) -> Self {
        self.default_output_capacity = capacity;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn default_await_timeout(mut self, timeout: Duration) -> Self {
        self.default_await_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn session_retention(mut self, retention: Duration) -> Self {
        self.session_retention_secs = retention.as_secs();
        self
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn adapter(mut self, adapter_type: impl Into<String>, command: AdapterCommand) -> Self {
        self.adapters.insert(adapter_type.into(), command);
        self
    }

    // ========================================================================
    // Derived settings
    // ========================================================================

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_millis(self.poll_interval_ms.max(1)),
            Duration::from_millis(self.default_await_timeout_ms),
        )
    }

    pub fn session_retention_period(&self) -> Duration {
        Duration::from_secs(self.session_retention_secs)
    }

    /// Parsed shell override, if configured
    pub fn shell_override(&self) -> Result<Option<ShellOverride>> {
        self.shell.as_deref().map(ShellOverride::parse).transpose()
    }

    pub fn adapter_command(&self, adapter_type: &str) -> Option<&AdapterCommand> {
        self.adapters.get(adapter_type)
    }
}

// ============================================================================
// Shell Override
// ============================================================================

/// Shell executable plus the arguments placed before the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellOverride {
    pub executable: String,
    pub args: Vec<String>,
}

impl ShellOverride {
    pub fn new(executable: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
        }
    }

    /// Parse `"bash -lc"` style strings
    pub fn parse(value: &str) -> Result<Self> {
        let mut parts = shlex::split(value)
            .ok_or_else(|| Error::Config(format!("Invalid shell override: {}", value)))?
            .into_iter();
        let executable = parts
            .next()
            .ok_or_else(|| Error::Config("Shell override is empty".to_string()))?;
        Ok(Self::new(executable, parts.collect()))
    }

    /// Platform default: `sh -c` or `cmd /C`
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::new("cmd", vec!["/C".to_string()])
        } else {
            Self::new("sh", vec!["-c".to_string()])
        }
    }
}

// ============================================================================
// Adapter Command
// ============================================================================

/// How to launch a debug adapter speaking the protocol over stdio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterCommand {
    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl AdapterCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn default_version() -> u32 {
    1
}

fn default_output_capacity() -> usize {
    DEFAULT_OUTPUT_CAPACITY
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_await_timeout_ms() -> u64 {
    30_000
}

fn default_session_retention_secs() -> u64 {
    300
}
