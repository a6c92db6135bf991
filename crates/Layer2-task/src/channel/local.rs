//! Local channel - runs command lines through the host shell
//!
//! Features:
//! - stdout/stderr streamed as raw chunks in arrival order
//! - All output delivered before the exit notification
//! - Idempotent close, killing the whole process group on Unix
//! - Interactive mode inheriting the host terminal

use super::r#trait::{
    ChannelControl, ChannelEvent, ChannelRequest, EventSink, ProcessChannel, ProcessHandle,
    SENTINEL_EXIT_CODE,
};
use parking_lot::Mutex;
use std::process::Stdio;
use std::time::Duration;
use tether_foundation::ShellOverride;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// How long readers may keep draining after a forced kill
const KILL_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Local channel that runs processes directly on the host
#[derive(Debug, Clone, Default)]
pub struct LocalChannel {
    /// Used when a request carries no shell override
    default_shell: Option<ShellOverride>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(shell: ShellOverride) -> Self {
        Self {
            default_shell: Some(shell),
        }
    }

    fn build_command(&self, request: &ChannelRequest) -> Command {
        let shell = request
            .shell
            .clone()
            .or_else(|| self.default_shell.clone())
            .unwrap_or_else(ShellOverride::platform_default);

        let mut cmd = Command::new(&shell.executable);
        cmd.args(&shell.args).arg(&request.command_line);

        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }

        // Parent environment is inherited; task-specific variables win
        cmd.envs(&request.env);

        if request.capture {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());

            // Own process group so close() reaches grandchildren too
            #[cfg(unix)]
            cmd.process_group(0);
        } else {
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }

        cmd.kill_on_drop(true);
        cmd
    }
}

impl ProcessChannel for LocalChannel {
    fn open(
        &self,
        handle: ProcessHandle,
        request: ChannelRequest,
        events: EventSink,
    ) -> Box<dyn ChannelControl> {
        let mut cmd = self.build_command(&request);
        debug!(%handle, label = %request.label, "Spawning: {}", request.command_line);

        match cmd.spawn() {
            Ok(child) => {
                let (kill_tx, kill_rx) = oneshot::channel();
                let group_kill = request.capture;
                tokio::spawn(supervise(
                    child,
                    handle,
                    request.label,
                    group_kill,
                    events,
                    kill_rx,
                ));
                Box::new(LocalControl::new(kill_tx))
            }
            Err(e) => {
                warn!(%handle, label = %request.label, "Failed to spawn process: {}", e);
                let _ = events.send(ChannelEvent::ProcessEnded {
                    handle,
                    label: request.label.clone(),
                    exit_code: SENTINEL_EXIT_CODE,
                });
                let _ = events.send(ChannelEvent::TaskEnded {
                    handle,
                    label: request.label,
                });
                Box::new(LocalControl::inert())
            }
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

// ============================================================================
// Control
// ============================================================================

/// Kill switch for one supervised process
struct LocalControl {
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl LocalControl {
    fn new(kill: oneshot::Sender<()>) -> Self {
        Self {
            kill: Mutex::new(Some(kill)),
        }
    }

    fn inert() -> Self {
        Self {
            kill: Mutex::new(None),
        }
    }
}

impl ChannelControl for LocalControl {
    fn close(&self) {
        if let Some(kill) = self.kill.lock().take() {
            // Receiver is gone once the process has exited
            let _ = kill.send(());
        }
    }
}

// ============================================================================
// Supervision
// ============================================================================

async fn supervise(
    mut child: Child,
    handle: ProcessHandle,
    label: String,
    group_kill: bool,
    events: EventSink,
    mut kill_rx: oneshot::Receiver<()>,
) {
    let readers: Vec<JoinHandle<()>> = [
        child.stdout.take().map(|s| spawn_reader(s, handle, events.clone())),
        child.stderr.take().map(|s| spawn_reader(s, handle, events.clone())),
    ]
    .into_iter()
    .flatten()
    .collect();

    let mut killed = false;
    let status = tokio::select! {
        status = child.wait() => status,
        // A dropped control resolves with Err and leaves the process alone
        Ok(()) = &mut kill_rx => {
            killed = true;
            kill_child(&mut child, group_kill);
            child.wait().await
        }
    };

    let exit_code = match status {
        Ok(status) => status.code().unwrap_or(SENTINEL_EXIT_CODE),
        Err(e) => {
            warn!(%handle, "Failed to wait for process: {}", e);
            SENTINEL_EXIT_CODE
        }
    };

    // Drain readers first so every chunk precedes the exit notification
    for reader in readers {
        if killed {
            let abort = reader.abort_handle();
            if tokio::time::timeout(KILL_DRAIN_TIMEOUT, reader).await.is_err() {
                abort.abort();
            }
        } else {
            let _ = reader.await;
        }
    }

    debug!(%handle, label = %label, exit_code, "Process ended");
    let _ = events.send(ChannelEvent::ProcessEnded {
        handle,
        label: label.clone(),
        exit_code,
    });
    let _ = events.send(ChannelEvent::TaskEnded { handle, label });
}

fn kill_child(child: &mut Child, group_kill: bool) {
    #[cfg(unix)]
    if group_kill {
        if let Some(pid) = child.id() {
            // SAFETY: plain syscall on a process group we created
            let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
            if rc == 0 {
                return;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = group_kill;

    if let Err(e) = child.start_kill() {
        debug!("Kill failed (process likely gone): {}", e);
    }
}

fn spawn_reader<R>(reader: R, handle: ProcessHandle, events: EventSink) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = reader;
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let mut decoder = Utf8Chunker::default();

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = decoder.decode(&buf[..n]);
                    if !chunk.is_empty()
                        && events.send(ChannelEvent::Output { handle, chunk }).is_err()
                    {
                        return;
                    }
                }
                Err(e) => {
                    debug!(%handle, "Output read error: {}", e);
                    break;
                }
            }
        }

        let rest = decoder.finish();
        if !rest.is_empty() {
            let _ = events.send(ChannelEvent::Output { handle, chunk: rest });
        }
    })
}

/// Decodes a byte stream into text without splitting multi-byte characters
/// across chunk boundaries. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let keep = match std::str::from_utf8(&self.pending) {
            Ok(_) => 0,
            // Incomplete trailing sequence: hold it for the next read
            Err(e) if e.error_len().is_none() => self.pending.len() - e.valid_up_to(),
            Err(_) => incomplete_tail(&self.pending),
        };

        let split = self.pending.len() - keep;
        let tail = self.pending.split_off(split);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of an incomplete UTF-8 sequence at the end of `bytes`, if any
fn incomplete_tail(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        let b = bytes[i];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let needed = match b {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return 0,
        };
        let have = bytes.len() - i;
        return if have < needed { have } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_utf8_chunker_holds_split_char() {
        let mut decoder = Utf8Chunker::default();
        let bytes = "héllo".as_bytes();
        // Split inside the two-byte 'é'
        assert_eq!(decoder.decode(&bytes[..2]), "h");
        assert_eq!(decoder.decode(&bytes[2..]), "éllo");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_utf8_chunker_replaces_invalid() {
        let mut decoder = Utf8Chunker::default();
        assert_eq!(decoder.decode(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn test_incomplete_tail() {
        assert_eq!(incomplete_tail(b"abc"), 0);
        assert_eq!(incomplete_tail(&[b'a', 0xE2, 0x82]), 2);
        assert_eq!(incomplete_tail(&[0xE2, 0x82, 0xAC]), 0);
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<ChannelEvent>) -> (String, Vec<i32>) {
        let mut output = String::new();
        let mut exits = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                ChannelEvent::Output { chunk, .. } => {
                    assert!(exits.is_empty(), "output after exit");
                    output.push_str(&chunk);
                }
                ChannelEvent::ProcessEnded { exit_code, .. } => exits.push(exit_code),
                ChannelEvent::TaskEnded { .. } => break,
            }
        }
        (output, exits)
    }

    fn request(command_line: &str) -> ChannelRequest {
        ChannelRequest {
            label: "test".to_string(),
            command_line: command_line.to_string(),
            cwd: None,
            env: Default::default(),
            shell: None,
            capture: true,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_channel_captures_and_exits() {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = LocalChannel::new();
        let _control = channel.open(ProcessHandle::next(), request("echo out; echo err >&2; exit 3"), tx);

        let (output, exits) = collect(rx).await;
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
        assert_eq!(exits, vec![3]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_channel_env_override() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut req = request("echo $TETHER_TEST_VALUE");
        req.env.insert("TETHER_TEST_VALUE".into(), "overridden".into());
        let _control = LocalChannel::new().open(ProcessHandle::next(), req, tx);

        let (output, exits) = collect(rx).await;
        assert_eq!(output.trim(), "overridden");
        assert_eq!(exits, vec![0]);
    }

    #[tokio::test]
    async fn test_spawn_failure_reports_sentinel() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut req = request("whatever");
        req.shell = Some(ShellOverride::new("/nonexistent/tether-shell", vec![]));
        let control = LocalChannel::new().open(ProcessHandle::next(), req, tx);
        control.close();

        let (output, exits) = collect(rx).await;
        assert!(output.is_empty());
        assert_eq!(exits, vec![SENTINEL_EXIT_CODE]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_kills_and_is_idempotent() {
        let (tx, rx) = mpsc::unbounded_channel();
        let control = LocalChannel::new().open(ProcessHandle::next(), request("sleep 30"), tx);
        control.close();
        control.close();

        let (_, exits) = tokio::time::timeout(Duration::from_secs(10), collect(rx))
            .await
            .unwrap();
        assert_eq!(exits, vec![SENTINEL_EXIT_CODE]);
    }
}
