//! Adapter events the session tracker understands

use serde_json::Value;

/// Output category that carries no user-visible text
pub const TELEMETRY_CATEGORY: &str = "telemetry";

/// A debug adapter event, reduced to the fields the engine uses
#[derive(Debug, Clone, PartialEq)]
pub enum DebugEvent {
    Initialized,
    Output {
        category: String,
        output: String,
    },
    Stopped {
        reason: String,
        thread_id: Option<i64>,
        description: Option<String>,
        text: Option<String>,
    },
    Continued {
        thread_id: Option<i64>,
    },
    Exited {
        exit_code: Option<i64>,
    },
    Terminated,
    /// Anything else (thread, module, breakpoint, process, ...)
    Other(String),
}

impl DebugEvent {
    /// Build from an event name and its (possibly absent) body
    pub fn from_message(event: &str, body: Option<&Value>) -> Self {
        let null = Value::Null;
        let body = body.unwrap_or(&null);
        let str_field = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
        let int_field = |key: &str| body.get(key).and_then(Value::as_i64);

        match event {
            "initialized" => DebugEvent::Initialized,
            "output" => DebugEvent::Output {
                category: str_field("category").unwrap_or_else(|| "console".to_string()),
                output: str_field("output").unwrap_or_default(),
            },
            "stopped" => DebugEvent::Stopped {
                reason: str_field("reason").unwrap_or_else(|| "unknown".to_string()),
                thread_id: int_field("threadId"),
                description: str_field("description"),
                text: str_field("text"),
            },
            "continued" => DebugEvent::Continued {
                thread_id: int_field("threadId"),
            },
            "exited" => DebugEvent::Exited {
                exit_code: int_field("exitCode"),
            },
            "terminated" => DebugEvent::Terminated,
            other => DebugEvent::Other(other.to_string()),
        }
    }

    /// Build from a full protocol message (`{"type":"event","event":...}`)
    pub fn from_protocol(message: &Value) -> Option<Self> {
        let name = message.get("event").and_then(Value::as_str)?;
        Some(Self::from_message(name, message.get("body")))
    }

    /// Event after which the adapter session is over
    pub fn ends_session(&self) -> bool {
        matches!(self, DebugEvent::Exited { .. } | DebugEvent::Terminated)
    }

    pub fn name(&self) -> &str {
        match self {
            DebugEvent::Initialized => "initialized",
            DebugEvent::Output { .. } => "output",
            DebugEvent::Stopped { .. } => "stopped",
            DebugEvent::Continued { .. } => "continued",
            DebugEvent::Exited { .. } => "exited",
            DebugEvent::Terminated => "terminated",
            DebugEvent::Other(name) => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_stopped() {
        let event = DebugEvent::from_protocol(&json!({
            "seq": 9,
            "type": "event",
            "event": "stopped",
            "body": { "reason": "exception", "threadId": 4, "text": "ZeroDivisionError" }
        }))
        .unwrap();

        assert_eq!(
            event,
            DebugEvent::Stopped {
                reason: "exception".into(),
                thread_id: Some(4),
                description: None,
                text: Some("ZeroDivisionError".into()),
            }
        );
    }

    #[test]
    fn test_parse_defaults() {
        assert_eq!(
            DebugEvent::from_message("output", Some(&json!({ "output": "hi\n" }))),
            DebugEvent::Output {
                category: "console".into(),
                output: "hi\n".into()
            }
        );
        assert_eq!(
            DebugEvent::from_message("exited", None),
            DebugEvent::Exited { exit_code: None }
        );
        assert_eq!(
            DebugEvent::from_message("module", None),
            DebugEvent::Other("module".into())
        );
    }

    #[test]
    fn test_ends_session() {
        assert!(DebugEvent::Terminated.ends_session());
        assert!(DebugEvent::Exited { exit_code: Some(0) }.ends_session());
        assert!(!DebugEvent::Initialized.ends_session());
        assert!(DebugEvent::from_protocol(&json!({ "type": "event" })).is_none());
    }
}
