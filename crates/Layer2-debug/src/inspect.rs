//! Inspection requests and their normalized results

use crate::transport::DebugTransport;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tether_foundation::{Error, Result};

/// One stack frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrameInfo {
    pub id: i64,
    pub name: String,
    /// Source path, else source name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub line: i64,
    pub column: i64,
}

impl StackFrameInfo {
    fn from_protocol(frame: &Value) -> Option<Self> {
        let source = frame.get("source").and_then(|s| {
            s.get("path")
                .or_else(|| s.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        Some(Self {
            id: frame.get("id")?.as_i64()?,
            name: frame
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("<unknown>")
                .to_string(),
            source,
            line: frame.get("line").and_then(Value::as_i64).unwrap_or(0),
            column: frame.get("column").and_then(Value::as_i64).unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableInfo {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Non-zero when the value has children
    pub variables_reference: i64,
}

impl VariableInfo {
    fn from_protocol(variable: &Value) -> Self {
        Self {
            name: str_or_empty(variable, "name"),
            value: str_or_empty(variable, "value"),
            type_name: variable
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string),
            variables_reference: variable
                .get("variablesReference")
                .and_then(Value::as_i64)
                .unwrap_or(0),
        }
    }
}

/// A scope and all of its variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeVariables {
    pub scope: String,
    pub variables_reference: i64,
    pub expensive: bool,
    pub variables: Vec<VariableInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    pub result: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub variables_reference: i64,
}

fn str_or_empty(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn array<'a>(body: &'a Value, key: &str) -> &'a [Value] {
    body.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

// ============================================================================
// Requests
// ============================================================================

pub async fn stack_trace(
    transport: &dyn DebugTransport,
    thread_id: i64,
) -> Result<Vec<StackFrameInfo>> {
    let body = transport
        .request("stackTrace", json!({ "threadId": thread_id }))
        .await?;
    Ok(array(&body, "stackFrames")
        .iter()
        .filter_map(StackFrameInfo::from_protocol)
        .collect())
}

/// Id of the innermost frame of `thread_id`
pub async fn top_frame_id(transport: &dyn DebugTransport, thread_id: i64) -> Result<i64> {
    let body = transport
        .request("stackTrace", json!({ "threadId": thread_id, "levels": 1 }))
        .await?;
    array(&body, "stackFrames")
        .first()
        .and_then(|frame| frame.get("id"))
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::InvalidState(format!("Thread {} has no stack frames", thread_id)))
}

/// Every scope of `frame_id` with every variable in it
pub async fn variables(
    transport: &dyn DebugTransport,
    frame_id: i64,
) -> Result<Vec<ScopeVariables>> {
    let body = transport
        .request("scopes", json!({ "frameId": frame_id }))
        .await?;

    let mut scopes = Vec::new();
    for scope in array(&body, "scopes") {
        let reference = scope
            .get("variablesReference")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let variables = if reference > 0 {
            let body = transport
                .request("variables", json!({ "variablesReference": reference }))
                .await?;
            array(&body, "variables")
                .iter()
                .map(VariableInfo::from_protocol)
                .collect()
        } else {
            Vec::new()
        };

        scopes.push(ScopeVariables {
            scope: str_or_empty(scope, "name"),
            variables_reference: reference,
            expensive: scope
                .get("expensive")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            variables,
        });
    }
    Ok(scopes)
}

pub async fn evaluate(
    transport: &dyn DebugTransport,
    expression: &str,
    frame_id: i64,
) -> Result<EvaluateResult> {
    let body = transport
        .request(
            "evaluate",
            json!({ "expression": expression, "frameId": frame_id, "context": "repl" }),
        )
        .await?;
    Ok(EvaluateResult {
        result: str_or_empty(&body, "result"),
        type_name: body.get("type").and_then(Value::as_str).map(str::to_string),
        variables_reference: body
            .get("variablesReference")
            .and_then(Value::as_i64)
            .unwrap_or(0),
    })
}

pub async fn continue_thread(transport: &dyn DebugTransport, thread_id: i64) -> Result<()> {
    transport
        .request("continue", json!({ "threadId": thread_id }))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_normalization() {
        let frame = StackFrameInfo::from_protocol(&json!({
            "id": 1000, "name": "main", "line": 12, "column": 5,
            "source": { "name": "main.rs", "path": "/src/main.rs" }
        }))
        .unwrap();
        assert_eq!(frame.source.as_deref(), Some("/src/main.rs"));
        assert_eq!(frame.line, 12);

        let frame = StackFrameInfo::from_protocol(&json!({
            "id": 7, "name": "<lambda>", "line": 1, "column": 1,
            "source": { "name": "<string>" }
        }))
        .unwrap();
        assert_eq!(frame.source.as_deref(), Some("<string>"));

        assert!(StackFrameInfo::from_protocol(&json!({ "name": "no id" })).is_none());
    }

    #[test]
    fn test_variable_json_shape() {
        let variable = VariableInfo::from_protocol(&json!({
            "name": "n", "value": "3", "type": "int", "variablesReference": 0
        }));
        let json = serde_json::to_value(&variable).unwrap();
        assert_eq!(json["type"], "int");
        assert_eq!(json["variablesReference"], 0);
    }
}
