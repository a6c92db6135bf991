//! Adapter transport - request/response plumbing to a debug adapter
//!
//! `StdioBackend` launches the adapter executable configured for a
//! configuration's type and talks to it over stdin/stdout. Requests are
//! correlated with responses by sequence number; events are forwarded to the
//! session's event queue.

use crate::event::DebugEvent;
use crate::protocol::{encode_message, error_response, read_message, request_message, Incoming};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_foundation::{AdapterCommand, DebugConfiguration, EngineConfig, Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, trace, warn};

/// Per-request response timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period for the adapter to exit after its stdin closes
const EXIT_GRACE: Duration = Duration::from_millis(500);

// ============================================================================
// Traits
// ============================================================================

/// Request channel to one adapter
#[async_trait]
pub trait DebugTransport: Send + Sync {
    /// Send a request and wait for its response body
    async fn request(&self, command: &str, arguments: Value) -> Result<Value>;

    /// Tear down the connection; idempotent
    async fn close(&self);
}

/// A live adapter connection
pub struct AdapterConnection {
    pub transport: Arc<dyn DebugTransport>,
    /// Adapter events in arrival order; ends with `Terminated` if the adapter goes away
    pub events: mpsc::UnboundedReceiver<DebugEvent>,
    /// Body of the `initialize` response
    pub capabilities: Value,
}

/// Backend trait - implement to add new ways of reaching adapters
#[async_trait]
pub trait DebugBackend: Send + Sync {
    /// Start an adapter for `config` and complete the `initialize` handshake
    async fn connect(&self, config: &DebugConfiguration) -> Result<AdapterConnection>;

    fn name(&self) -> &'static str;
}

// ============================================================================
// Stdio backend
// ============================================================================

/// Launches adapters as child processes
#[derive(Debug, Clone)]
pub struct StdioBackend {
    adapters: HashMap<String, AdapterCommand>,
    request_timeout: Duration,
}

impl StdioBackend {
    pub fn new(adapters: HashMap<String, AdapterCommand>) -> Self {
        Self {
            adapters,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn from_engine(config: &EngineConfig) -> Self {
        Self::new(config.adapters.clone())
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Check if the adapter for `adapter_type` is configured and installed
    pub fn is_available(&self, adapter_type: &str) -> bool {
        self.adapters
            .get(adapter_type)
            .map_or(false, |a| which::which(&a.command).is_ok())
    }
}

#[async_trait]
impl DebugBackend for StdioBackend {
    async fn connect(&self, config: &DebugConfiguration) -> Result<AdapterConnection> {
        let adapter = self.adapters.get(&config.adapter_type).ok_or_else(|| {
            Error::Config(format!(
                "No debug adapter configured for type '{}'",
                config.adapter_type
            ))
        })?;

        let executable = which::which(&adapter.command)
            .map_err(|_| Error::Spawn(format!("Debug adapter not found: {}", adapter.command)))?;

        let mut child = Command::new(executable)
            .args(&adapter.args)
            .envs(&adapter.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Spawn(format!("Failed to start {}: {}", adapter.command, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Internal("Failed to get adapter stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("Failed to get adapter stdout".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(adapter.command.clone(), stderr);
        }

        let (events_tx, events) = mpsc::unbounded_channel();
        let transport = Arc::new(
            StdioTransport::from_streams(
                adapter.command.clone(),
                stdin,
                stdout,
                events_tx,
                self.request_timeout,
            )
            .with_child(child),
        );

        let capabilities = match transport
            .request("initialize", initialize_arguments(&config.adapter_type))
            .await
        {
            Ok(capabilities) => capabilities,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };

        debug!(adapter = %adapter.command, "Debug adapter initialized");
        Ok(AdapterConnection {
            transport,
            events,
            capabilities,
        })
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

pub fn initialize_arguments(adapter_type: &str) -> Value {
    json!({
        "clientID": "tether",
        "clientName": "Tether",
        "adapterID": adapter_type,
        "locale": "en-US",
        "linesStartAt1": true,
        "columnsStartAt1": true,
        "pathFormat": "path",
        "supportsVariableType": true,
        "supportsRunInTerminalRequest": false,
    })
}

fn spawn_stderr_logger(adapter: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(adapter = %adapter, "{}", line);
        }
    });
}

// ============================================================================
// Stdio transport
// ============================================================================

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value>>>>>;

/// Content-Length framed transport over a byte stream pair
pub struct StdioTransport {
    adapter: String,
    seq: Arc<AtomicI64>,
    outgoing: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    pending: PendingMap,
    child: Mutex<Option<Child>>,
    timeout: Duration,
}

impl StdioTransport {
    /// Start writer and reader tasks over `writer`/`reader`
    pub fn from_streams<W, R>(
        adapter: impl Into<String>,
        writer: W,
        reader: R,
        events: mpsc::UnboundedSender<DebugEvent>,
        timeout: Duration,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let adapter = adapter.into();
        let seq = Arc::new(AtomicI64::new(1));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (outgoing, rx) = mpsc::channel::<Vec<u8>>(32);

        start_writer(adapter.clone(), writer, rx);
        tokio::spawn(read_loop(
            adapter.clone(),
            reader,
            Arc::clone(&pending),
            events,
            outgoing.downgrade(),
            Arc::clone(&seq),
        ));

        Self {
            adapter,
            seq,
            outgoing: Mutex::new(Some(outgoing)),
            pending,
            child: Mutex::new(None),
            timeout,
        }
    }

    /// Own the adapter process so `close` can reap it
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Mutex::new(Some(child));
        self
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl DebugTransport for StdioTransport {
    async fn request(&self, command: &str, arguments: Value) -> Result<Value> {
        let seq = self.next_seq();
        let bytes = encode_message(&request_message(seq, command, arguments))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(seq, tx);

        let sent = match self.outgoing.lock().await.as_ref() {
            Some(outgoing) => outgoing.send(bytes).await.is_ok(),
            None => false,
        };
        if !sent {
            self.pending.lock().await.remove(&seq);
            return Err(Error::Transport(format!(
                "Debug adapter {} is not connected",
                self.adapter
            )));
        }
        trace!(seq, command, "DAP request");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Transport(format!(
                "Debug adapter {} dropped request {}",
                self.adapter, command
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&seq);
                Err(Error::Transport(format!(
                    "{} request timed out after {:?}",
                    command, self.timeout
                )))
            }
        }
    }

    async fn close(&self) {
        // Last strong sender: the writer drains, then shuts the adapter's stdin
        self.outgoing.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            if tokio::time::timeout(EXIT_GRACE, child.wait()).await.is_err() {
                if let Err(e) = child.kill().await {
                    debug!(adapter = %self.adapter, "Kill failed: {}", e);
                }
            }
        }
    }
}

fn start_writer<W>(adapter: String, mut writer: W, mut rx: mpsc::Receiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = writer.write_all(&message).await {
                error!(adapter = %adapter, "Failed to write to adapter: {}", e);
                break;
            }
            if let Err(e) = writer.flush().await {
                error!(adapter = %adapter, "Failed to flush adapter stdin: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
        debug!(adapter = %adapter, "Adapter writer finished");
    });
}

async fn read_loop<R>(
    adapter: String,
    reader: R,
    pending: PendingMap,
    events: mpsc::UnboundedSender<DebugEvent>,
    outgoing: mpsc::WeakSender<Vec<u8>>,
    seq: Arc<AtomicI64>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);

    loop {
        let message = match read_message(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(adapter = %adapter, "Adapter closed its output");
                break;
            }
            Err(e) => {
                warn!(adapter = %adapter, "Failed to read adapter message: {}", e);
                break;
            }
        };

        match Incoming::classify(&message) {
            Incoming::Response {
                request_seq,
                success,
                command,
                message,
                body,
            } => {
                let Some(sender) = pending.lock().await.remove(&request_seq) else {
                    trace!(request_seq, "Response for unknown request");
                    continue;
                };
                let result = if success {
                    Ok(body)
                } else {
                    let reason = message
                        .or_else(|| {
                            body.pointer("/error/format")
                                .and_then(Value::as_str)
                                .map(str::to_string)
                        })
                        .unwrap_or_else(|| "request failed".to_string());
                    Err(Error::adapter(command, reason))
                };
                let _ = sender.send(result);
            }
            Incoming::Event(raw) => {
                if let Some(event) = DebugEvent::from_protocol(&raw) {
                    trace!(adapter = %adapter, event = event.name(), "DAP event");
                    let _ = events.send(event);
                }
            }
            Incoming::Request {
                seq: request_seq,
                command,
            } => {
                debug!(adapter = %adapter, command = %command, "Refusing reverse request");
                let reply = error_response(
                    seq.fetch_add(1, Ordering::SeqCst),
                    request_seq,
                    &command,
                    "not supported by this client",
                );
                let Some(outgoing) = outgoing.upgrade() else {
                    continue;
                };
                if let Ok(bytes) = encode_message(&reply) {
                    let _ = outgoing.send(bytes).await;
                }
            }
            Incoming::Unknown => trace!(adapter = %adapter, "Unrecognized adapter message"),
        }
    }

    // Adapter is gone: fail waiters and end the session
    for (id, sender) in pending.lock().await.drain() {
        let _ = sender.send(Err(Error::Transport(format!(
            "Debug adapter {} terminated (request {})",
            adapter, id
        ))));
    }
    let _ = events.send(DebugEvent::Terminated);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    /// Minimal adapter speaking the wire format on the far end of a duplex pair
    async fn fake_adapter(stream: DuplexStream) {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut seq = 100;

        while let Ok(Some(message)) = read_message(&mut reader).await {
            let request_seq = message["seq"].as_i64().unwrap();
            let command = message["command"].as_str().unwrap_or_default().to_string();
            seq += 1;
            let reply = match command.as_str() {
                "threads" => json!({
                    "seq": seq, "type": "response", "request_seq": request_seq,
                    "success": true, "command": "threads",
                    "body": { "threads": [{ "id": 1, "name": "main" }] }
                }),
                "launch" => {
                    let event = json!({ "seq": seq, "type": "event", "event": "initialized" });
                    write_half.write_all(&encode_message(&event).unwrap()).await.unwrap();
                    seq += 1;
                    json!({
                        "seq": seq, "type": "response", "request_seq": request_seq,
                        "success": true, "command": "launch"
                    })
                }
                "quit" => break,
                other => json!({
                    "seq": seq, "type": "response", "request_seq": request_seq,
                    "success": false, "command": other, "message": "unsupported"
                }),
            };
            write_half.write_all(&encode_message(&reply).unwrap()).await.unwrap();
        }
    }

    fn connect() -> (StdioTransport, mpsc::UnboundedReceiver<DebugEvent>) {
        let (transport, events, _hung_up) = connect_watched();
        (transport, events)
    }

    /// Also reports when the fake adapter's input reaches EOF
    fn connect_watched() -> (
        StdioTransport,
        mpsc::UnboundedReceiver<DebugEvent>,
        oneshot::Receiver<()>,
    ) {
        let (client, server) = duplex(64 * 1024);
        let (hung_up_tx, hung_up) = oneshot::channel();
        tokio::spawn(async move {
            fake_adapter(server).await;
            let _ = hung_up_tx.send(());
        });
        let (read_half, write_half) = tokio::io::split(client);
        let (events_tx, events) = mpsc::unbounded_channel();
        let transport = StdioTransport::from_streams(
            "fake",
            write_half,
            read_half,
            events_tx,
            Duration::from_secs(5),
        );
        (transport, events, hung_up)
    }

    #[tokio::test]
    async fn test_request_response_correlation() {
        let (transport, _events) = connect();
        let body = transport.request("threads", Value::Null).await.unwrap();
        assert_eq!(body["threads"][0]["name"], "main");
    }

    #[tokio::test]
    async fn test_failed_response_is_adapter_error() {
        let (transport, _events) = connect();
        let err = transport.request("evaluate", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Adapter error: evaluate - unsupported");
        assert_eq!(err.kind(), "transport_failure");
    }

    #[tokio::test]
    async fn test_events_forwarded_and_eof_terminates() {
        let (transport, mut events) = connect();
        transport.request("launch", json!({})).await.unwrap();
        assert_eq!(events.recv().await, Some(DebugEvent::Initialized));

        // Adapter stops answering and hangs up
        let err = transport.request("quit", Value::Null).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(events.recv().await, Some(DebugEvent::Terminated));
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_requests() {
        let (transport, _events) = connect();
        transport.close().await;
        transport.close().await;
        let err = transport.request("threads", Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }

    #[tokio::test]
    async fn test_close_ends_adapter_input() {
        let (transport, _events, hung_up) = connect_watched();
        transport.request("threads", Value::Null).await.unwrap();

        transport.close().await;
        tokio::time::timeout(Duration::from_secs(1), hung_up)
            .await
            .expect("adapter input never closed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_unconfigured_adapter_type() {
        let backend = StdioBackend::new(HashMap::new());
        let config = DebugConfiguration::new(
            "app",
            "nope",
            tether_foundation::RequestKind::Launch,
        );
        let err = backend.connect(&config).await.err().unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert!(!backend.is_available("nope"));
    }

    #[tokio::test]
    async fn test_missing_adapter_executable() {
        let mut adapters = HashMap::new();
        adapters.insert(
            "ghost".to_string(),
            AdapterCommand::new("tether-no-such-adapter-binary"),
        );
        let backend = StdioBackend::new(adapters);
        let config =
            DebugConfiguration::new("app", "ghost", tether_foundation::RequestKind::Launch);
        let err = backend.connect(&config).await.err().unwrap();
        assert_eq!(err.kind(), "spawn_failure");
    }
}
