//! Debug Manager - session lifecycle and the inspection surface
//!
//! Starts adapters through a [`DebugBackend`], pumps their events into the
//! [`DebugSessionRegistry`], and gates every inspection request on the
//! session being paused.

use crate::breakpoints::{set_breakpoints_arguments, Breakpoint, BreakpointStore};
use crate::event::DebugEvent;
use crate::inspect::{self, EvaluateResult, ScopeVariables, StackFrameInfo};
use crate::registry::{DebugAwaitResult, DebugRegistryConfig, DebugSessionRegistry, SessionEvent};
use crate::session::{SessionId, SessionSnapshot, SessionState};
use crate::transport::{DebugBackend, DebugTransport};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tether_foundation::{DebugConfiguration, Error, InputValues, OutputSnapshot, Result};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Budget for the adapter to acknowledge `disconnect`
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long events are still read after `exited` when `terminated` never comes
pub const EXITED_DRAIN: Duration = Duration::from_millis(500);

/// Result of starting a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDebugResult {
    pub session_id: SessionId,
    pub console_overridden: bool,
    pub session: SessionSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTrace {
    pub session_id: SessionId,
    pub thread_id: i64,
    pub frames: Vec<StackFrameInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameVariables {
    pub session_id: SessionId,
    pub frame_id: i64,
    pub scopes: Vec<ScopeVariables>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueResult {
    pub session_id: SessionId,
    pub thread_id: i64,
}

/// Debug Manager
///
/// Cheap to clone; clones share sessions, adapters and breakpoints.
#[derive(Clone)]
pub struct DebugManager {
    registry: DebugSessionRegistry,
    backend: Arc<dyn DebugBackend>,
    breakpoints: Arc<BreakpointStore>,
    transports: Arc<RwLock<HashMap<SessionId, Arc<dyn DebugTransport>>>>,
}

impl DebugManager {
    pub fn new(backend: Arc<dyn DebugBackend>, config: DebugRegistryConfig) -> Self {
        Self {
            registry: DebugSessionRegistry::new(config),
            backend,
            breakpoints: Arc::new(BreakpointStore::new()),
            transports: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &DebugSessionRegistry {
        &self.registry
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start a session for `config` with `inputs` substituted
    pub async fn start(
        &self,
        mut config: DebugConfiguration,
        inputs: &InputValues,
    ) -> Result<StartDebugResult> {
        config.substitute_inputs(inputs);
        let console_overridden = config.apply_console_override();
        if console_overridden {
            debug!(name = %config.name, "Terminal console replaced with internal console");
        }

        let connection = self.backend.connect(&config).await?;
        let session = self.registry.create(&config, console_overridden).await;
        let id = session.id.clone();

        self.transports
            .write()
            .await
            .insert(id.clone(), Arc::clone(&connection.transport));
        self.spawn_pump(id.clone(), Arc::clone(&connection.transport), connection.events);

        let command = config.request.command();
        if let Err(e) = connection
            .transport
            .request(command, config.request_arguments())
            .await
        {
            warn!(id = %id, "Debug {} rejected: {}", command, e);
            self.teardown(&id).await;
            return Err(e);
        }

        info!(id = %id, name = %config.name, backend = self.backend.name(), "Debug session started");
        Ok(StartDebugResult {
            session_id: id.clone(),
            console_overridden,
            session: self.registry.get(&id).await?,
        })
    }

    /// Stop the named or current session
    pub async fn stop(&self, id: Option<&SessionId>) -> Result<SessionSnapshot> {
        let target = self.registry.resolve(id).await?;
        if !target.state.is_active() {
            return Ok(target);
        }

        let transport = self.transports.read().await.get(&target.id).cloned();
        if let Some(transport) = transport {
            let disconnect =
                transport.request("disconnect", json!({ "terminateDebuggee": true }));
            match tokio::time::timeout(DISCONNECT_TIMEOUT, disconnect).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!(id = %target.id, "Disconnect failed: {}", e),
                Err(_) => warn!(id = %target.id, "Disconnect timed out"),
            }
        }

        self.teardown(&target.id).await;
        info!(id = %target.id, "Debug session stopped");
        self.registry.get(&target.id).await
    }

    /// Stop every active session; returns how many were stopped
    pub async fn shutdown(&self) -> usize {
        let mut stopped = 0;
        for session in self.registry.active().await {
            if self.stop(Some(&session.id)).await.is_ok() {
                stopped += 1;
            }
        }
        stopped
    }

    pub async fn status(&self) -> Vec<SessionSnapshot> {
        self.registry.active().await
    }

    pub async fn output(&self, id: Option<&SessionId>) -> Result<OutputSnapshot> {
        self.registry.output(id).await
    }

    pub async fn await_state_change(
        &self,
        id: Option<&SessionId>,
        timeout: Option<Duration>,
    ) -> Result<DebugAwaitResult> {
        self.registry.await_state_change(id, timeout).await
    }

    fn spawn_pump(
        &self,
        id: SessionId,
        transport: Arc<dyn DebugTransport>,
        mut events: mpsc::UnboundedReceiver<DebugEvent>,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            let notifier = manager.registry.notifier();
            let mut ended = false;
            loop {
                // After `exited` the adapter may still flush output
                let next = if ended {
                    match tokio::time::timeout(EXITED_DRAIN, events.recv()).await {
                        Ok(next) => next,
                        Err(_) => {
                            debug!(id = %id, "No terminated event after exit");
                            break;
                        }
                    }
                } else {
                    events.recv().await
                };
                let Some(event) = next else {
                    break;
                };

                let initialized = event == DebugEvent::Initialized;
                let terminated = event == DebugEvent::Terminated;
                ended |= event.ends_session();
                let message = SessionEvent {
                    session: id.clone(),
                    event,
                };
                if notifier.send(message).is_err() {
                    break;
                }
                if initialized {
                    let manager = manager.clone();
                    let transport = Arc::clone(&transport);
                    let id = id.clone();
                    tokio::spawn(async move { manager.configure(&id, transport.as_ref()).await });
                }
                if terminated {
                    break;
                }
            }
            // The end event settles the session through the dispatcher
            if ended {
                manager.release(&id).await;
            } else {
                manager.teardown(&id).await;
            }
        });
    }

    /// Push the breakpoint set, then finish configuration
    async fn configure(&self, id: &SessionId, transport: &dyn DebugTransport) {
        for file in self.breakpoints.files() {
            let arguments = set_breakpoints_arguments(&file, &self.breakpoints.for_file(&file));
            if let Err(e) = transport.request("setBreakpoints", arguments).await {
                warn!(id = %id, file = %file.display(), "setBreakpoints failed: {}", e);
            }
        }
        if let Err(e) = transport.request("configurationDone", json!({})).await {
            warn!(id = %id, "configurationDone failed: {}", e);
        }
    }

    /// Drop the adapter connection; idempotent
    async fn release(&self, id: &SessionId) {
        let transport = self.transports.write().await.remove(id);
        if let Some(transport) = transport {
            transport.close().await;
        }
    }

    /// Drop the adapter and mark the session terminated; idempotent
    async fn teardown(&self, id: &SessionId) {
        let transport = self.transports.write().await.remove(id);
        if let Err(e) = self.registry.finalize(id).await {
            debug!(id = %id, "Finalize skipped: {}", e);
        }
        if let Some(transport) = transport {
            transport.close().await;
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Resolve a paused session and its adapter, without touching the adapter
    async fn paused_target(
        &self,
        id: Option<&SessionId>,
    ) -> Result<(SessionSnapshot, Arc<dyn DebugTransport>)> {
        let session = self.registry.resolve(id).await?;
        if session.state != SessionState::Paused {
            return Err(Error::InvalidState(format!(
                "Debug session {} is {}, not paused",
                session.id, session.state
            )));
        }
        let transport = self
            .transports
            .read()
            .await
            .get(&session.id)
            .cloned()
            .ok_or_else(|| {
                Error::InvalidState(format!("Debug session {} has no adapter", session.id))
            })?;
        Ok((session, transport))
    }

    pub async fn stack_trace(&self, id: Option<&SessionId>) -> Result<StackTrace> {
        let (session, transport) = self.paused_target(id).await?;
        let thread_id = stopped_thread(&session)?;
        let frames = inspect::stack_trace(transport.as_ref(), thread_id).await?;
        Ok(StackTrace {
            session_id: session.id,
            thread_id,
            frames,
        })
    }

    pub async fn variables(
        &self,
        id: Option<&SessionId>,
        frame_id: Option<i64>,
    ) -> Result<FrameVariables> {
        let (session, transport) = self.paused_target(id).await?;
        let frame_id = match frame_id {
            Some(frame_id) => frame_id,
            None => inspect::top_frame_id(transport.as_ref(), stopped_thread(&session)?).await?,
        };
        let scopes = inspect::variables(transport.as_ref(), frame_id).await?;
        Ok(FrameVariables {
            session_id: session.id,
            frame_id,
            scopes,
        })
    }

    pub async fn evaluate(
        &self,
        expression: &str,
        id: Option<&SessionId>,
        frame_id: Option<i64>,
    ) -> Result<EvaluateResult> {
        if expression.trim().is_empty() {
            return Err(Error::InvalidInput("Expression is empty".to_string()));
        }
        let (session, transport) = self.paused_target(id).await?;
        let frame_id = match frame_id {
            Some(frame_id) => frame_id,
            None => inspect::top_frame_id(transport.as_ref(), stopped_thread(&session)?).await?,
        };
        inspect::evaluate(transport.as_ref(), expression, frame_id).await
    }

    /// Resume a thread. Local state changes on the adapter's `continued` event.
    pub async fn continue_execution(
        &self,
        id: Option<&SessionId>,
        thread_id: Option<i64>,
    ) -> Result<ContinueResult> {
        let (session, transport) = self.paused_target(id).await?;
        let thread_id = match thread_id {
            Some(thread_id) => thread_id,
            None => stopped_thread(&session)?,
        };
        inspect::continue_thread(transport.as_ref(), thread_id).await?;
        Ok(ContinueResult {
            session_id: session.id,
            thread_id,
        })
    }

    // ========================================================================
    // Breakpoints
    // ========================================================================

    /// Add or replace a breakpoint and push its file to configured sessions
    pub async fn add_breakpoint(&self, breakpoint: Breakpoint) -> Result<Breakpoint> {
        let (breakpoint, added) = self.breakpoints.add(breakpoint)?;
        debug!(
            file = %breakpoint.file.display(),
            line = breakpoint.line,
            enabled = breakpoint.enabled,
            added,
            "Breakpoint set"
        );
        self.sync_file(&breakpoint.file).await;
        Ok(breakpoint)
    }

    pub async fn remove_breakpoint(&self, file: &Path, line: u32) -> Result<Breakpoint> {
        let breakpoint = self.breakpoints.remove(file, line)?;
        debug!(file = %breakpoint.file.display(), line, "Breakpoint removed");
        self.sync_file(&breakpoint.file).await;
        Ok(breakpoint)
    }

    pub fn list_breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints.list()
    }

    /// Replace `file`'s breakpoints in every configured session
    async fn sync_file(&self, file: &Path) {
        let arguments = set_breakpoints_arguments(file, &self.breakpoints.for_file(file));
        for session in self.registry.active().await {
            if session.state == SessionState::Initializing {
                continue;
            }
            let Some(transport) = self.transports.read().await.get(&session.id).cloned() else {
                continue;
            };
            if let Err(e) = transport.request("setBreakpoints", arguments.clone()).await {
                warn!(id = %session.id, file = %file.display(), "Breakpoint sync failed: {}", e);
            }
        }
    }
}

fn stopped_thread(session: &SessionSnapshot) -> Result<i64> {
    session.thread_id.ok_or_else(|| {
        Error::InvalidState(format!("Debug session {} has no stopped thread", session.id))
    })
}
