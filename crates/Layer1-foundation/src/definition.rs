//! Task and debug definitions consumed by the engine
//!
//! Discovery of these definitions is someone else's job; the engine only
//! needs the resolved shapes below plus `${input:<name>}` substitution.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Console values that attach the debuggee to a terminal we cannot capture
pub const TERMINAL_CONSOLES: &[&str] = &["integratedTerminal", "externalTerminal"];

/// Console value routing debuggee output through adapter `output` events
pub const INTERNAL_CONSOLE: &str = "internalConsole";

static INPUT_PATTERN: OnceLock<Regex> = OnceLock::new();

fn input_pattern() -> &'static Regex {
    INPUT_PATTERN.get_or_init(|| Regex::new(r"\$\{input:([^}]+)\}").expect("input pattern is valid"))
}

/// Resolved input values keyed by input id
pub type InputValues = HashMap<String, String>;

/// A runnable shell task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    /// Unique label
    pub label: String,

    /// Command line, executed through the shell
    pub command: String,

    /// Working directory (defaults to the engine's)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Extra environment, layered over the inherited one
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Long-running watcher style task
    #[serde(default)]
    pub background: bool,

    /// Per-task output capacity override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_capacity: Option<usize>,

    /// Needs a live terminal; output is not captured
    #[serde(default)]
    pub interactive: bool,
}

impl TaskDefinition {
    pub fn new(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
            cwd: None,
            env: HashMap::new(),
            background: false,
            output_capacity: None,
            interactive: false,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
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

    /// Command line with input placeholders resolved
    pub fn resolve_command(&self, inputs: &InputValues) -> String {
        substitute_inputs(&self.command, inputs)
    }
}

/// Debug request kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Launch,
    Attach,
}

impl RequestKind {
    /// Protocol command name
    pub fn command(&self) -> &'static str {
        match self {
            RequestKind::Launch => "launch",
            RequestKind::Attach => "attach",
        }
    }
}

/// A debug launch/attach configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugConfiguration {
    pub name: String,

    /// Adapter type, used to pick the adapter executable
    #[serde(rename = "type")]
    pub adapter_type: String,

    pub request: RequestKind,

    /// Per-session output capacity override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_capacity: Option<usize>,

    /// Keep a terminal console setting as configured
    #[serde(default)]
    pub preserve_console: bool,

    /// Remaining adapter-specific fields (program, args, console, ...)
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl DebugConfiguration {
    pub fn new(
        name: impl Into<String>,
        adapter_type: impl Into<String>,
        request: RequestKind,
    ) -> Self {
        Self {
            name: name.into(),
            adapter_type: adapter_type.into(),
            request,
            output_capacity: None,
            preserve_console: false,
            payload: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn console(&self) -> Option<&str> {
        self.payload.get("console").and_then(Value::as_str)
    }

    /// Swap a terminal console for the internal one unless opted out.
    /// Returns whether the payload was changed.
    pub fn apply_console_override(&mut self) -> bool {
        if self.preserve_console {
            return false;
        }
        let attached = self
            .console()
            .map_or(false, |console| TERMINAL_CONSOLES.contains(&console));
        if attached {
            self.payload
                .insert("console".to_string(), Value::from(INTERNAL_CONSOLE));
        }
        attached
    }

    /// Replace input placeholders in every string leaf of the payload
    pub fn substitute_inputs(&mut self, inputs: &InputValues) {
        for value in self.payload.values_mut() {
            substitute_value(value, inputs);
        }
    }

    /// Arguments for the launch/attach request
    pub fn request_arguments(&self) -> Value {
        let mut args = self.payload.clone();
        args.insert("name".to_string(), Value::from(self.name.clone()));
        args.insert("type".to_string(), Value::from(self.adapter_type.clone()));
        args.insert("request".to_string(), Value::from(self.request.command()));
        Value::Object(args)
    }
}

/// Replace `${input:<name>}` with the supplied value; unknown names stay as-is
pub fn substitute_inputs(text: &str, inputs: &InputValues) -> String {
    if inputs.is_empty() {
        return text.to_string();
    }
    input_pattern()
        .replace_all(text, |caps: &Captures<'_>| match inputs.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Recursive [`substitute_inputs`] over a JSON value
pub fn substitute_value(value: &mut Value, inputs: &InputValues) {
    match value {
        Value::String(s) => {
            let replaced = substitute_inputs(s, inputs);
            *s = replaced;
        }
        Value::Array(items) => items.iter_mut().for_each(|v| substitute_value(v, inputs)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute_value(v, inputs)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(pairs: &[(&str, &str)]) -> InputValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitute_known_and_unknown() {
        let values = inputs(&[("target", "release")]);
        assert_eq!(
            substitute_inputs("cargo build --${input:target} ${input:other}", &values),
            "cargo build --release ${input:other}"
        );
    }

    #[test]
    fn test_task_definition_deserialize_defaults() {
        let task: TaskDefinition =
            serde_json::from_value(json!({ "label": "build", "command": "make" })).unwrap();
        assert_eq!(task.label, "build");
        assert!(!task.interactive);
        assert!(!task.background);
        assert_eq!(task.output_capacity, None);
    }

    #[test]
    fn test_debug_configuration_flattens_payload() {
        let config: DebugConfiguration = serde_json::from_value(json!({
            "name": "app",
            "type": "lldb",
            "request": "launch",
            "program": "${input:bin}",
            "args": ["--port", "${input:port}"],
            "console": "integratedTerminal"
        }))
        .unwrap();

        assert_eq!(config.adapter_type, "lldb");
        assert_eq!(config.request, RequestKind::Launch);
        assert_eq!(config.console(), Some("integratedTerminal"));

        let mut config = config;
        config.substitute_inputs(&inputs(&[("bin", "./target/app"), ("port", "8080")]));
        assert_eq!(config.payload["program"], json!("./target/app"));
        assert_eq!(config.payload["args"], json!(["--port", "8080"]));
    }

    #[test]
    fn test_console_override() {
        let mut config = DebugConfiguration::new("app", "lldb", RequestKind::Launch)
            .with_field("console", json!("externalTerminal"));
        assert!(config.apply_console_override());
        assert_eq!(config.console(), Some(INTERNAL_CONSOLE));
        // Second pass is a no-op
        assert!(!config.apply_console_override());
    }

    #[test]
    fn test_console_override_opt_out() {
        let mut config = DebugConfiguration::new("app", "lldb", RequestKind::Launch)
            .with_field("console", json!("integratedTerminal"));
        config.preserve_console = true;
        assert!(!config.apply_console_override());
        assert_eq!(config.console(), Some("integratedTerminal"));
    }

    #[test]
    fn test_request_arguments() {
        let config = DebugConfiguration::new("app", "lldb", RequestKind::Attach)
            .with_field("pid", json!(42));
        let args = config.request_arguments();
        assert_eq!(args["request"], json!("attach"));
        assert_eq!(args["type"], json!("lldb"));
        assert_eq!(args["pid"], json!(42));
    }
}
