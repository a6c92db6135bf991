//! Task Registry - owns every execution and applies lifecycle notifications
//!
//! Features:
//! - Start (captured or interactive), status, output, cancel, await
//! - One dispatcher task applies every channel notification in order
//! - Idempotent settlement under duplicate or reordered notifications
//! - Label fallback for interactive notifications carrying a foreign handle

use crate::channel::{
    ChannelControl, ChannelEvent, ChannelRequest, EventSink, LocalChannel, ProcessChannel,
    ProcessHandle,
};
use crate::execution::{Execution, ExecutionId, ExecutionSnapshot, StartOptions};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_foundation::{
    poll_until, EngineConfig, Error, OutputSnapshot, PollSettings, Probe, Result, ShellOverride,
    WaitOutcome, DEFAULT_OUTPUT_CAPACITY,
};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Configuration for the task registry
#[derive(Debug, Clone)]
pub struct TaskRegistryConfig {
    /// Output Buffer capacity when a start carries no override
    pub default_output_capacity: usize,

    /// Await cadence and default budget
    pub poll: PollSettings,

    /// Shell used when a start carries no override
    pub shell: Option<ShellOverride>,
}

impl Default for TaskRegistryConfig {
    fn default() -> Self {
        Self {
            default_output_capacity: DEFAULT_OUTPUT_CAPACITY,
            poll: PollSettings::default(),
            shell: None,
        }
    }
}

impl TaskRegistryConfig {
    pub fn from_engine(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            default_output_capacity: config.default_output_capacity,
            poll: config.poll_settings(),
            shell: config.shell_override()?,
        })
    }
}

/// Result of awaiting an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAwaitResult {
    /// Settled as completed within the budget
    pub success: bool,
    /// Budget exhausted while still running
    pub timed_out: bool,
    pub execution: ExecutionSnapshot,
}

impl TaskAwaitResult {
    fn from_outcome(outcome: WaitOutcome<ExecutionSnapshot>) -> Self {
        let timed_out = outcome.is_timed_out();
        let execution = outcome.into_value();
        Self {
            success: !timed_out && execution.status.is_success(),
            timed_out,
            execution,
        }
    }
}

/// How a notification was matched to an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Handle recorded at start
    Direct,
    /// Running interactive execution with the same label
    LabelFallback,
}

// ============================================================================
// Registry state
// ============================================================================

/// Bookkeeping behind the registry lock
#[derive(Default)]
pub(crate) struct RegistryState {
    executions: HashMap<ExecutionId, Execution>,
    /// Live handles only; removed by process-ended cleanup
    handles: HashMap<ProcessHandle, ExecutionId>,
    controls: HashMap<ExecutionId, Box<dyn ChannelControl>>,
    /// Handles whose process already ended
    retired: HashSet<ProcessHandle>,
}

impl RegistryState {
    pub(crate) fn insert(&mut self, execution: Execution) {
        self.handles.insert(execution.handle, execution.id.clone());
        self.executions.insert(execution.id.clone(), execution);
    }

    pub(crate) fn attach_control(&mut self, id: ExecutionId, control: Box<dyn ChannelControl>) {
        self.controls.insert(id, control);
    }

    pub(crate) fn get(&self, id: &ExecutionId) -> Option<&Execution> {
        self.executions.get(id)
    }

    /// Map a notification to its execution.
    ///
    /// Two strategies, in order: the handle recorded at start, then the
    /// oldest running interactive execution with the same label. Handles of
    /// processes that already ended never fall through to the label match.
    pub(crate) fn resolve_execution(
        &self,
        handle: ProcessHandle,
        label: &str,
    ) -> Option<(ExecutionId, Resolution)> {
        if let Some(id) = self.handles.get(&handle) {
            return Some((id.clone(), Resolution::Direct));
        }
        if self.retired.contains(&handle) {
            return None;
        }

        self.executions
            .values()
            .filter(|e| e.interactive && e.is_running() && e.label == label)
            .min_by_key(|e| e.seq)
            .map(|e| (e.id.clone(), Resolution::LabelFallback))
    }

    /// Apply one channel notification
    pub(crate) fn apply(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Output { handle, chunk } => {
                let Some(id) = self.handles.get(&handle) else {
                    return;
                };
                if let Some(execution) = self.executions.get_mut(id) {
                    execution.append_output(&chunk);
                }
            }
            ChannelEvent::ProcessEnded {
                handle,
                label,
                exit_code,
            } => {
                let Some((id, resolution)) = self.resolve_execution(handle, &label) else {
                    debug!(%handle, label = %label, "Process ended for unknown execution");
                    return;
                };
                if let Some(execution) = self.executions.get_mut(&id) {
                    if execution.settle_exit(exit_code) {
                        info!(
                            id = %id,
                            exit_code,
                            status = %execution.status,
                            ?resolution,
                            "Execution settled"
                        );
                    }
                }
                self.cleanup(&id, handle);
            }
            ChannelEvent::TaskEnded { handle, label } => {
                let Some((id, resolution)) = self.resolve_execution(handle, &label) else {
                    return;
                };
                if let Some(execution) = self.executions.get_mut(&id) {
                    if execution.mark_task_ended() {
                        debug!(id = %id, ?resolution, "Terminal task ended; awaiting exit code");
                    }
                }
            }
        }
    }

    /// Final bookkeeping for an ended process; only the process-ended path calls this
    fn cleanup(&mut self, id: &ExecutionId, handle: ProcessHandle) {
        let stored = self.executions.get(id).map(|e| e.handle);
        for h in std::iter::once(handle).chain(stored) {
            self.handles.remove(&h);
            self.retired.insert(h);
        }
        self.controls.remove(id);
    }

    pub(crate) fn is_tracked(&self, handle: ProcessHandle) -> bool {
        self.handles.contains_key(&handle)
    }
}

// ============================================================================
// Task Registry
// ============================================================================

/// Task Registry - handles execution lifecycle
///
/// Cheap to clone; clones share state. Construction spawns the dispatcher,
/// so it must happen inside a tokio runtime.
#[derive(Clone)]
pub struct TaskRegistry {
    state: Arc<RwLock<RegistryState>>,
    channel: Arc<dyn ProcessChannel>,
    events: EventSink,
    config: Arc<TaskRegistryConfig>,
    sequence: Arc<AtomicU64>,
}

impl TaskRegistry {
    /// Create a registry running processes on the host
    pub fn new(config: TaskRegistryConfig) -> Self {
        Self::with_channel(config, Arc::new(LocalChannel::new()))
    }

    /// Create a registry on a custom channel
    pub fn with_channel(config: TaskRegistryConfig, channel: Arc<dyn ProcessChannel>) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(RegistryState::default()));
        tokio::spawn(dispatch(Arc::clone(&state), rx));

        debug!(channel = channel.name(), "Task registry started");
        Self {
            state,
            channel,
            events,
            config: Arc::new(config),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sink for notifications from outside the registry's own channel,
    /// e.g. a terminal host reporting interactive task ends
    pub fn notifier(&self) -> EventSink {
        self.events.clone()
    }

    pub fn config(&self) -> &TaskRegistryConfig {
        &self.config
    }

    // ========== Start ==========

    /// Start an execution; returns as soon as the process is requested
    pub async fn start(
        &self,
        label: impl Into<String>,
        command: impl Into<String>,
        options: StartOptions,
    ) -> ExecutionSnapshot {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = ProcessHandle::next();
        let execution = Execution::new(
            seq,
            label,
            command,
            handle,
            &options,
            self.config.default_output_capacity,
        );

        let request = ChannelRequest {
            label: execution.label.clone(),
            command_line: execution.command.clone(),
            cwd: options.cwd,
            env: options.env,
            shell: options.shell.or_else(|| self.config.shell.clone()),
            capture: !options.interactive,
        };
        let id = execution.id.clone();
        let snapshot = execution.snapshot();

        // Opened under the lock so no notification outruns the bookkeeping
        let mut state = self.state.write().await;
        state.insert(execution);
        let control = self.channel.open(handle, request, self.events.clone());
        state.attach_control(id.clone(), control);

        info!(
            id = %id,
            label = %snapshot.label,
            interactive = snapshot.interactive,
            "Execution started"
        );
        snapshot
    }

    /// Start an execution attached to the host terminal, without capture
    pub async fn start_interactive(
        &self,
        label: impl Into<String>,
        command: impl Into<String>,
        options: StartOptions,
    ) -> ExecutionSnapshot {
        self.start(label, command, options.interactive()).await
    }

    // ========== Queries ==========

    pub async fn status(&self, id: &ExecutionId) -> Result<ExecutionSnapshot> {
        let state = self.state.read().await;
        state
            .get(id)
            .map(Execution::snapshot)
            .ok_or_else(|| not_found(id))
    }

    pub async fn output(&self, id: &ExecutionId) -> Result<OutputSnapshot> {
        let state = self.state.read().await;
        state
            .get(id)
            .map(Execution::output_snapshot)
            .ok_or_else(|| not_found(id))
    }

    /// Every execution, newest first
    pub async fn list(&self) -> Vec<ExecutionSnapshot> {
        let state = self.state.read().await;
        let mut executions: Vec<&Execution> = state.executions.values().collect();
        executions.sort_by(|a, b| b.seq.cmp(&a.seq));
        executions.into_iter().map(Execution::snapshot).collect()
    }

    /// Ids of running executions
    pub async fn running(&self) -> Vec<ExecutionId> {
        let state = self.state.read().await;
        state
            .executions
            .values()
            .filter(|e| e.is_running())
            .map(|e| e.id.clone())
            .collect()
    }

    // ========== Control ==========

    /// Cancel a running execution
    pub async fn cancel(&self, id: &ExecutionId) -> Result<ExecutionSnapshot> {
        let mut state = self.state.write().await;
        let execution = state.executions.get_mut(id).ok_or_else(|| not_found(id))?;

        if !execution.cancel() {
            return Err(Error::InvalidState(format!(
                "Execution {} is not running ({})",
                id, execution.status
            )));
        }
        let snapshot = execution.snapshot();

        // Control stays registered until the process-ended cleanup
        if let Some(control) = state.controls.get(id) {
            control.close();
        }

        info!(id = %id, "Cancelled execution");
        Ok(snapshot)
    }

    /// Wait until the execution settles or the budget runs out.
    ///
    /// A timeout does not cancel the execution.
    pub async fn await_settled(
        &self,
        id: &ExecutionId,
        timeout: Option<Duration>,
    ) -> Result<TaskAwaitResult> {
        let registry = self;
        let outcome = poll_until(&self.config.poll, timeout, move || async move {
            let snapshot = registry.status(id).await?;
            Ok(if snapshot.status.is_terminal() {
                Probe::Settled(snapshot)
            } else {
                Probe::Pending(snapshot)
            })
        })
        .await?;

        if outcome.is_timed_out() {
            debug!(id = %id, "Await timed out; execution keeps running");
        }
        Ok(TaskAwaitResult::from_outcome(outcome))
    }

    /// Cancel everything still running (engine teardown)
    pub async fn shutdown(&self) -> usize {
        let mut state = self.state.write().await;
        let running: Vec<ExecutionId> = state
            .executions
            .values()
            .filter(|e| e.is_running())
            .map(|e| e.id.clone())
            .collect();

        for id in &running {
            if let Some(execution) = state.executions.get_mut(id) {
                execution.cancel();
            }
        }
        for control in state.controls.values() {
            control.close();
        }

        if !running.is_empty() {
            warn!("Shutdown cancelled {} executions", running.len());
        }
        running.len()
    }
}

fn not_found(id: &ExecutionId) -> Error {
    Error::NotFound(format!("Execution {}", id))
}

/// Dispatcher loop; ends when every sender is gone
async fn dispatch(state: Arc<RwLock<RegistryState>>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        state.write().await.apply(event);
    }
    debug!("Task event dispatcher stopped");
}
