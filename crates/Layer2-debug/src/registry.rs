//! Debug Session Registry - tracks every session and applies adapter events
//!
//! Adapter events for all sessions arrive on one queue and are applied by a
//! single dispatcher task. Terminated sessions stay readable for a retention
//! period, then are pruned.

use crate::event::DebugEvent;
use crate::session::{DebugSession, SessionId, SessionSnapshot, SessionState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_foundation::{
    poll_until, DebugConfiguration, EngineConfig, Error, OutputBuffer, OutputSnapshot,
    PollSettings, Probe, Result, DEFAULT_OUTPUT_CAPACITY,
};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// Default retention for terminated sessions
pub const DEFAULT_SESSION_RETENTION: Duration = Duration::from_secs(300);

/// An adapter event addressed to a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: DebugEvent,
}

/// Sink for session events
pub type SessionEventSink = mpsc::UnboundedSender<SessionEvent>;

/// Configuration for the session registry
#[derive(Debug, Clone)]
pub struct DebugRegistryConfig {
    pub default_output_capacity: usize,
    pub poll: PollSettings,
    /// How long terminated sessions stay readable
    pub retention: Duration,
}

impl Default for DebugRegistryConfig {
    fn default() -> Self {
        Self {
            default_output_capacity: DEFAULT_OUTPUT_CAPACITY,
            poll: PollSettings::default(),
            retention: DEFAULT_SESSION_RETENTION,
        }
    }
}

impl DebugRegistryConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            default_output_capacity: config.default_output_capacity,
            poll: config.poll_settings(),
            retention: config.session_retention_period(),
        }
    }
}

/// Result of awaiting a state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugAwaitResult {
    pub timed_out: bool,
    pub session: SessionSnapshot,
}

// ============================================================================
// Registry
// ============================================================================

/// Debug Session Registry
///
/// Cheap to clone; clones share state. Construction spawns the dispatcher,
/// so it must happen inside a tokio runtime.
#[derive(Clone)]
pub struct DebugSessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, DebugSession>>>,
    events: SessionEventSink,
    config: Arc<DebugRegistryConfig>,
    sequence: Arc<AtomicU64>,
}

impl DebugSessionRegistry {
    pub fn new(config: DebugRegistryConfig) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let sessions = Arc::new(RwLock::new(HashMap::new()));
        tokio::spawn(dispatch(Arc::clone(&sessions), rx));

        Self {
            sessions,
            events,
            config: Arc::new(config),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sink feeding the dispatcher
    pub fn notifier(&self) -> SessionEventSink {
        self.events.clone()
    }

    pub fn config(&self) -> &DebugRegistryConfig {
        &self.config
    }

    /// Record a new session in `initializing`
    pub async fn create(
        &self,
        config: &DebugConfiguration,
        console_overridden: bool,
    ) -> SessionSnapshot {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let id = SessionId::generate(seq);
        let output =
            OutputBuffer::with_override(config.output_capacity, self.config.default_output_capacity);
        let session = DebugSession::new(
            id.clone(),
            seq,
            &config.name,
            &config.adapter_type,
            config.request,
            output,
            console_overridden,
        );
        let snapshot = session.snapshot();

        let mut sessions = self.sessions.write().await;
        prune(&mut sessions, self.config.retention);
        sessions.insert(id.clone(), session);

        info!(id = %id, name = %config.name, "Debug session created");
        snapshot
    }

    /// Apply an event immediately, bypassing the queue
    pub async fn apply(&self, id: &SessionId, event: &DebugEvent) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        Ok(apply_event(session, event))
    }

    /// Force a session to `terminated`
    pub async fn finalize(&self, id: &SessionId) -> Result<SessionSnapshot> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        if session.terminate() {
            info!(id = %id, "Debug session terminated");
        }
        Ok(session.snapshot())
    }

    pub async fn get(&self, id: &SessionId) -> Result<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(DebugSession::snapshot)
            .ok_or_else(|| not_found(id))
    }

    /// Sessions that have not terminated, newest first
    pub async fn active(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        let mut active: Vec<&DebugSession> =
            sessions.values().filter(|s| s.state.is_active()).collect();
        active.sort_by(|a, b| b.seq.cmp(&a.seq));
        active.into_iter().map(DebugSession::snapshot).collect()
    }

    /// Explicit id, else the current (most recently started) active session
    pub async fn resolve(&self, id: Option<&SessionId>) -> Result<SessionSnapshot> {
        match id {
            Some(id) => self.get(id).await,
            None => self
                .active()
                .await
                .into_iter()
                .next()
                .ok_or(Error::NoActiveSession),
        }
    }

    pub async fn output(&self, id: Option<&SessionId>) -> Result<OutputSnapshot> {
        let target = self.resolve(id).await?;
        let sessions = self.sessions.read().await;
        sessions
            .get(&target.id)
            .map(DebugSession::output_snapshot)
            .ok_or_else(|| not_found(&target.id))
    }

    /// Wait until the session is paused or terminated
    pub async fn await_state_change(
        &self,
        id: Option<&SessionId>,
        timeout: Option<Duration>,
    ) -> Result<DebugAwaitResult> {
        let target = self.resolve(id).await?.id;
        let registry = self;
        let target = &target;
        let outcome = poll_until(&self.config.poll, timeout, move || async move {
            let snapshot = registry.get(target).await?;
            Ok(if snapshot.state.is_settled() {
                Probe::Settled(snapshot)
            } else {
                Probe::Pending(snapshot)
            })
        })
        .await?;

        Ok(DebugAwaitResult {
            timed_out: outcome.is_timed_out(),
            session: outcome.into_value(),
        })
    }

    /// Drop terminated sessions past the retention period
    pub async fn prune(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        prune(&mut sessions, self.config.retention)
    }
}

fn not_found(id: &SessionId) -> Error {
    Error::NotFound(format!("Debug session {}", id))
}

fn apply_event(session: &mut DebugSession, event: &DebugEvent) -> bool {
    let before = session.state;
    let applied = session.apply(event);
    if !applied {
        debug!(id = %session.id, event = event.name(), state = %before, "Ignored debug event");
    } else if before != session.state {
        debug!(id = %session.id, from = %before, to = %session.state, "Debug session state changed");
    }
    applied
}

fn prune(sessions: &mut HashMap<SessionId, DebugSession>, retention: Duration) -> usize {
    let now = Utc::now();
    let before = sessions.len();
    sessions.retain(|_, s| match (s.state, s.ended_at) {
        (SessionState::Terminated, Some(ended)) => {
            (now - ended).to_std().unwrap_or_default() < retention
        }
        _ => true,
    });
    before - sessions.len()
}

/// Dispatcher loop; ends when every sender is gone
async fn dispatch(
    sessions: Arc<RwLock<HashMap<SessionId, DebugSession>>>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    while let Some(SessionEvent { session, event }) = events.recv().await {
        let mut sessions = sessions.write().await;
        match sessions.get_mut(&session) {
            Some(target) => {
                apply_event(target, &event);
            }
            None => debug!(id = %session, event = event.name(), "Event for unknown session"),
        }
    }
    debug!("Debug event dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_foundation::RequestKind;

    fn configuration(name: &str) -> DebugConfiguration {
        DebugConfiguration::new(name, "lldb", RequestKind::Launch)
    }

    #[tokio::test]
    async fn test_resolve_current_session() {
        let registry = DebugSessionRegistry::new(DebugRegistryConfig::default());
        assert!(matches!(registry.resolve(None).await, Err(Error::NoActiveSession)));

        let first = registry.create(&configuration("a"), false).await;
        let second = registry.create(&configuration("b"), false).await;
        assert_eq!(registry.resolve(None).await.unwrap().id, second.id);

        registry.finalize(&second.id).await.unwrap();
        assert_eq!(registry.resolve(None).await.unwrap().id, first.id);

        // Terminated sessions stay readable by id but are not active
        assert_eq!(
            registry.get(&second.id).await.unwrap().state,
            SessionState::Terminated
        );
        assert_eq!(registry.active().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let registry = DebugSessionRegistry::new(DebugRegistryConfig::default());
        let missing = SessionId::from("dbg-0-missing");
        assert!(matches!(registry.get(&missing).await, Err(Error::NotFound(_))));
        assert!(matches!(
            registry.apply(&missing, &DebugEvent::Initialized).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_prune_after_retention() {
        let config = DebugRegistryConfig {
            retention: Duration::ZERO,
            ..Default::default()
        };
        let registry = DebugSessionRegistry::new(config);
        let session = registry.create(&configuration("a"), false).await;
        registry.finalize(&session.id).await.unwrap();

        assert_eq!(registry.prune().await, 1);
        assert!(matches!(registry.get(&session.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_output_capacity_override() {
        let registry = DebugSessionRegistry::new(DebugRegistryConfig::default());
        let mut config = configuration("a");
        config.output_capacity = Some(3);
        let session = registry.create(&config, true).await;
        assert!(session.console_overridden);

        registry
            .apply(
                &session.id,
                &DebugEvent::Output {
                    category: "stdout".into(),
                    output: "hello".into(),
                },
            )
            .await
            .unwrap();

        let output = registry.output(Some(&session.id)).await.unwrap();
        assert_eq!(output.content, "hel");
        assert!(output.truncated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_via_dispatcher() {
        let registry = DebugSessionRegistry::new(DebugRegistryConfig::default());
        let session = registry.create(&configuration("a"), false).await;
        let notifier = registry.notifier();

        let timed_out = registry
            .await_state_change(None, Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(timed_out.timed_out);
        assert_eq!(timed_out.session.state, SessionState::Initializing);

        for event in [
            DebugEvent::Initialized,
            DebugEvent::Stopped {
                reason: "breakpoint".into(),
                thread_id: Some(1),
                description: None,
                text: None,
            },
        ] {
            notifier
                .send(SessionEvent {
                    session: session.id.clone(),
                    event,
                })
                .unwrap();
        }

        let result = registry.await_state_change(Some(&session.id), None).await.unwrap();
        assert!(!result.timed_out);
        assert_eq!(result.session.state, SessionState::Paused);
        assert_eq!(result.session.thread_id, Some(1));
    }
}
