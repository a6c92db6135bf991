//! Engine - one entry point over tasks, debug sessions and the catalog

use crate::catalog::Catalog;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tether_debug::{
    Breakpoint, ContinueResult, DebugAwaitResult, DebugBackend, DebugManager,
    DebugRegistryConfig, EvaluateResult, FrameVariables, SessionId, SessionSnapshot, StackTrace,
    StartDebugResult, StdioBackend,
};
use tether_foundation::{substitute_inputs, EngineConfig, InputValues, OutputSnapshot, Result};
use tether_task::{
    ExecutionId, ExecutionSnapshot, LocalChannel, ProcessChannel, StartOptions, TaskAwaitResult,
    TaskRegistry, TaskRegistryConfig,
};
use tracing::info;

/// Tether engine
///
/// Cheap to clone; clones share every registry. Construction spawns the
/// registries' dispatchers, so it must happen inside a tokio runtime.
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    catalog: Arc<RwLock<Catalog>>,
    tasks: TaskRegistry,
    debug: DebugManager,
}

impl Engine {
    /// Local processes and stdio debug adapters
    pub fn new(config: EngineConfig, catalog: Catalog) -> Result<Self> {
        let channel = Arc::new(LocalChannel::new());
        let backend = Arc::new(StdioBackend::from_engine(&config));
        Self::with_parts(config, catalog, channel, backend)
    }

    /// Custom process channel and debug backend
    pub fn with_parts(
        config: EngineConfig,
        catalog: Catalog,
        channel: Arc<dyn ProcessChannel>,
        backend: Arc<dyn DebugBackend>,
    ) -> Result<Self> {
        catalog.validate()?;
        let tasks = TaskRegistry::with_channel(TaskRegistryConfig::from_engine(&config)?, channel);
        let debug = DebugManager::new(backend, DebugRegistryConfig::from_engine(&config));

        Ok(Self {
            config: Arc::new(config),
            catalog: Arc::new(RwLock::new(catalog)),
            tasks,
            debug,
        })
    }

    /// Layered engine config plus the project catalog under `root`
    pub fn load(root: &Path) -> Result<Self> {
        let mut config = EngineConfig::load()?;
        config.merge(EngineConfig::load_project(root)?);
        let catalog = Catalog::load_project(root)?;
        info!(root = %root.display(), "Engine loaded");
        Self::new(config, catalog)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> Catalog {
        self.catalog.read().clone()
    }

    pub fn replace_catalog(&self, catalog: Catalog) -> Result<()> {
        catalog.validate()?;
        *self.catalog.write() = catalog;
        Ok(())
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn debugger(&self) -> &DebugManager {
        &self.debug
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    /// Start the task labelled `label` with `inputs` substituted
    pub async fn run_task(&self, label: &str, inputs: &InputValues) -> Result<ExecutionSnapshot> {
        let task = self.catalog.read().task(label)?.clone();
        let command = task.resolve_command(inputs);

        let mut options = StartOptions::from(&task);
        for value in options.env.values_mut() {
            *value = substitute_inputs(value, inputs);
        }
        options.cwd = task
            .cwd
            .as_ref()
            .map(|cwd| PathBuf::from(substitute_inputs(&cwd.to_string_lossy(), inputs)));

        Ok(self.tasks.start(task.label, command, options).await)
    }

    pub async fn task_status(&self, id: &ExecutionId) -> Result<ExecutionSnapshot> {
        self.tasks.status(id).await
    }

    /// Every execution, newest first
    pub async fn executions(&self) -> Vec<ExecutionSnapshot> {
        self.tasks.list().await
    }

    pub async fn task_output(&self, id: &ExecutionId) -> Result<OutputSnapshot> {
        self.tasks.output(id).await
    }

    pub async fn cancel_task(&self, id: &ExecutionId) -> Result<ExecutionSnapshot> {
        self.tasks.cancel(id).await
    }

    pub async fn await_task(
        &self,
        id: &ExecutionId,
        timeout: Option<Duration>,
    ) -> Result<TaskAwaitResult> {
        self.tasks.await_settled(id, timeout).await
    }

    // ========================================================================
    // Debug sessions
    // ========================================================================

    pub async fn start_debug(&self, name: &str, inputs: &InputValues) -> Result<StartDebugResult> {
        let configuration = self.catalog.read().configuration(name)?.clone();
        self.debug.start(configuration, inputs).await
    }

    pub async fn stop_debug(&self, id: Option<&SessionId>) -> Result<SessionSnapshot> {
        self.debug.stop(id).await
    }

    pub async fn debug_status(&self) -> Vec<SessionSnapshot> {
        self.debug.status().await
    }

    pub async fn debug_output(&self, id: Option<&SessionId>) -> Result<OutputSnapshot> {
        self.debug.output(id).await
    }

    pub async fn stack_trace(&self, id: Option<&SessionId>) -> Result<StackTrace> {
        self.debug.stack_trace(id).await
    }

    pub async fn variables(
        &self,
        id: Option<&SessionId>,
        frame_id: Option<i64>,
    ) -> Result<FrameVariables> {
        self.debug.variables(id, frame_id).await
    }

    pub async fn evaluate(
        &self,
        expression: &str,
        id: Option<&SessionId>,
        frame_id: Option<i64>,
    ) -> Result<EvaluateResult> {
        self.debug.evaluate(expression, id, frame_id).await
    }

    pub async fn continue_execution(
        &self,
        id: Option<&SessionId>,
        thread_id: Option<i64>,
    ) -> Result<ContinueResult> {
        self.debug.continue_execution(id, thread_id).await
    }

    pub async fn await_debug_event(
        &self,
        id: Option<&SessionId>,
        timeout: Option<Duration>,
    ) -> Result<DebugAwaitResult> {
        self.debug.await_state_change(id, timeout).await
    }

    pub async fn add_breakpoint(&self, breakpoint: Breakpoint) -> Result<Breakpoint> {
        self.debug.add_breakpoint(breakpoint).await
    }

    pub async fn remove_breakpoint(&self, file: &Path, line: u32) -> Result<Breakpoint> {
        self.debug.remove_breakpoint(file, line).await
    }

    pub fn list_breakpoints(&self) -> Vec<Breakpoint> {
        self.debug.list_breakpoints()
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Cancel running executions and stop active sessions
    pub async fn shutdown(&self) {
        let executions = self.tasks.shutdown().await;
        let sessions = self.debug.shutdown().await;
        info!(executions, sessions, "Engine shut down");
    }
}
