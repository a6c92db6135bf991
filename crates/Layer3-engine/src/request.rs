//! JSON request/response surface
//!
//! One request per line in, one response per line out. Requests are tagged by
//! `op`; every response carries `ok` plus either `result` or `error`.

use crate::engine::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tether_debug::{Breakpoint, SessionId};
use tether_foundation::{Error, InputValues, Result};
use tether_task::ExecutionId;
use tracing::debug;

/// An engine request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    // ========== Tasks ==========
    RunTask {
        label: String,
        #[serde(default)]
        inputs: InputValues,
    },
    /// All executions when `id` is omitted
    GetTaskStatus {
        #[serde(default)]
        id: Option<ExecutionId>,
    },
    GetTaskOutput {
        id: ExecutionId,
    },
    CancelTask {
        id: ExecutionId,
    },
    AwaitTask {
        id: ExecutionId,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    // ========== Debug ==========
    StartDebug {
        name: String,
        #[serde(default)]
        inputs: InputValues,
    },
    StopDebug {
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    GetDebugStatus,
    GetDebugOutput {
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    GetStackTrace {
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    GetVariables {
        #[serde(default)]
        session_id: Option<SessionId>,
        #[serde(default)]
        frame_id: Option<i64>,
    },
    Evaluate {
        expression: String,
        #[serde(default)]
        session_id: Option<SessionId>,
        #[serde(default)]
        frame_id: Option<i64>,
    },
    ContinueExecution {
        #[serde(default)]
        session_id: Option<SessionId>,
        #[serde(default)]
        thread_id: Option<i64>,
    },
    AwaitDebugEvent {
        #[serde(default)]
        session_id: Option<SessionId>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    // ========== Breakpoints ==========
    AddBreakpoint {
        file: PathBuf,
        line: u32,
        #[serde(default)]
        condition: Option<String>,
        #[serde(default)]
        hit_condition: Option<String>,
        #[serde(default)]
        log_message: Option<String>,
        #[serde(default = "enabled_by_default")]
        enabled: bool,
    },
    RemoveBreakpoint {
        file: PathBuf,
        line: u32,
    },
    ListBreakpoints,

    // ========== Catalog ==========
    ListDefinitions,
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::RunTask { .. } => "runTask",
            Request::GetTaskStatus { .. } => "getTaskStatus",
            Request::GetTaskOutput { .. } => "getTaskOutput",
            Request::CancelTask { .. } => "cancelTask",
            Request::AwaitTask { .. } => "awaitTask",
            Request::StartDebug { .. } => "startDebug",
            Request::StopDebug { .. } => "stopDebug",
            Request::GetDebugStatus => "getDebugStatus",
            Request::GetDebugOutput { .. } => "getDebugOutput",
            Request::GetStackTrace { .. } => "getStackTrace",
            Request::GetVariables { .. } => "getVariables",
            Request::Evaluate { .. } => "evaluate",
            Request::ContinueExecution { .. } => "continueExecution",
            Request::AwaitDebugEvent { .. } => "awaitDebugEvent",
            Request::AddBreakpoint { .. } => "addBreakpoint",
            Request::RemoveBreakpoint { .. } => "removeBreakpoint",
            Request::ListBreakpoints => "listBreakpoints",
            Request::ListDefinitions => "listDefinitions",
        }
    }
}

/// Error payload of a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// Response to one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: &Error) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ErrorBody {
                kind: error.kind().to_string(),
                message: error.to_string(),
            }),
        }
    }

    fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(e) => Self::failure(&e),
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn millis(timeout_ms: Option<u64>) -> Option<Duration> {
    timeout_ms.map(Duration::from_millis)
}

impl Engine {
    /// Execute one request
    pub async fn handle(&self, request: Request) -> Response {
        let op = request.op();
        let response = Response::from_result(self.dispatch(request).await);
        if let Some(error) = &response.error {
            debug!(op, kind = %error.kind, "request failed: {}", error.message);
        }
        response
    }

    /// Parse and execute one JSON line
    pub async fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => Response::failure(&Error::InvalidInput(format!("Bad request: {}", e))),
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Value> {
        match request {
            Request::RunTask { label, inputs } => to_value(self.run_task(&label, &inputs).await?),
            Request::GetTaskStatus { id: Some(id) } => to_value(self.task_status(&id).await?),
            Request::GetTaskStatus { id: None } => to_value(self.executions().await),
            Request::GetTaskOutput { id } => to_value(self.task_output(&id).await?),
            Request::CancelTask { id } => to_value(self.cancel_task(&id).await?),
            Request::AwaitTask { id, timeout_ms } => {
                to_value(self.await_task(&id, millis(timeout_ms)).await?)
            }

            Request::StartDebug { name, inputs } => {
                to_value(self.start_debug(&name, &inputs).await?)
            }
            Request::StopDebug { session_id } => {
                to_value(self.stop_debug(session_id.as_ref()).await?)
            }
            Request::GetDebugStatus => to_value(self.debug_status().await),
            Request::GetDebugOutput { session_id } => {
                to_value(self.debug_output(session_id.as_ref()).await?)
            }
            Request::GetStackTrace { session_id } => {
                to_value(self.stack_trace(session_id.as_ref()).await?)
            }
            Request::GetVariables {
                session_id,
                frame_id,
            } => to_value(self.variables(session_id.as_ref(), frame_id).await?),
            Request::Evaluate {
                expression,
                session_id,
                frame_id,
            } => to_value(
                self.evaluate(&expression, session_id.as_ref(), frame_id)
                    .await?,
            ),
            Request::ContinueExecution {
                session_id,
                thread_id,
            } => to_value(
                self.continue_execution(session_id.as_ref(), thread_id)
                    .await?,
            ),
            Request::AwaitDebugEvent {
                session_id,
                timeout_ms,
            } => to_value(
                self.await_debug_event(session_id.as_ref(), millis(timeout_ms))
                    .await?,
            ),

            Request::AddBreakpoint {
                file,
                line,
                condition,
                hit_condition,
                log_message,
                enabled,
            } => {
                let breakpoint = Breakpoint {
                    file,
                    line,
                    enabled,
                    condition,
                    hit_condition,
                    log_message,
                };
                to_value(self.add_breakpoint(breakpoint).await?)
            }
            Request::RemoveBreakpoint { file, line } => {
                to_value(self.remove_breakpoint(&file, line).await?)
            }
            Request::ListBreakpoints => to_value(self.list_breakpoints()),

            Request::ListDefinitions => to_value(self.catalog()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_requests() {
        let request: Request = serde_json::from_value(json!({
            "op": "awaitTask", "id": "exec-1-abcd1234", "timeoutMs": 5000
        }))
        .unwrap();
        assert_eq!(
            request,
            Request::AwaitTask {
                id: ExecutionId::from("exec-1-abcd1234"),
                timeout_ms: Some(5000),
            }
        );

        let request: Request = serde_json::from_value(json!({
            "op": "runTask", "label": "build", "inputs": { "target": "release" }
        }))
        .unwrap();
        assert_eq!(request.op(), "runTask");

        let request: Request =
            serde_json::from_value(json!({ "op": "getStackTrace" })).unwrap();
        assert_eq!(request, Request::GetStackTrace { session_id: None });

        let request: Request = serde_json::from_value(json!({
            "op": "addBreakpoint", "file": "/p/a.py", "line": 3, "logMessage": "at {x}"
        }))
        .unwrap();
        assert_eq!(
            request,
            Request::AddBreakpoint {
                file: PathBuf::from("/p/a.py"),
                line: 3,
                condition: None,
                hit_condition: None,
                log_message: Some("at {x}".to_string()),
                enabled: true,
            }
        );

        assert!(serde_json::from_value::<Request>(json!({ "op": "reboot" })).is_err());
    }

    #[test]
    fn test_response_shape() {
        let ok = serde_json::to_value(Response::success(json!({ "x": 1 }))).unwrap();
        assert_eq!(ok, json!({ "ok": true, "result": { "x": 1 } }));

        let failed =
            serde_json::to_value(Response::failure(&Error::NoActiveSession)).unwrap();
        assert_eq!(failed["ok"], false);
        assert_eq!(failed["error"]["kind"], "no_active_session");
        assert!(failed.get("result").is_none());
    }
}
