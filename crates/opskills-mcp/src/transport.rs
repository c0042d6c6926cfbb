//! MCP transport implementations.
//!
//! A transport moves newline-delimited JSON envelopes. Writes go through
//! [`Transport::send`]; reads happen on a background loop started by
//! [`Transport::start`] that decodes each line and hands it to an
//! [`InboundSink`]. The primary transport is stdio, which spawns a child
//! process and talks to it via stdin/stdout.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opskills_core::McpServerConfig;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CodecError, TransportError};
use crate::protocol::{decode_bytes, Message};

/// Default time a server gets to exit after SIGTERM before it is killed.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Receives what the read loop decodes.
///
/// Called from the read loop itself, so implementations must not block.
pub trait InboundSink: Send + Sync {
    /// A decoded envelope.
    fn deliver(&self, message: Message);

    /// A line that could not be decoded. The loop keeps going.
    fn decode_error(&self, line: &str, error: CodecError) {
        warn!(error = %error, line_len = line.len(), "Dropping undecodable message");
    }

    /// The loop has ended: `None` after `stop`, otherwise why the stream ended.
    fn closed(&self, reason: Option<TransportError>);
}

/// Trait for MCP transport implementations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Launch the read loop, feeding `sink` until end-of-stream or `stop`.
    async fn start(
        &self,
        sink: Arc<dyn InboundSink>,
        cancel: CancellationToken,
    ) -> Result<(), TransportError>;

    /// Send one encoded envelope. Concurrent sends are written whole, in
    /// the order they acquire the write path.
    async fn send(&self, line: &str) -> Result<(), TransportError>;

    /// Stop the read loop, close the pipes and wait for the loop to exit.
    /// Stopping twice is a no-op.
    async fn stop(&self) -> Result<(), TransportError>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// Reader/writer pair plus the read loop bookkeeping shared by every transport.
struct Pipes {
    reader: parking_lot::Mutex<Option<BoxedReader>>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    connected: Arc<AtomicBool>,
    cancel: parking_lot::Mutex<Option<CancellationToken>>,
    read_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Pipes {
    fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            reader: parking_lot::Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            connected: Arc::new(AtomicBool::new(false)),
            cancel: parking_lot::Mutex::new(None),
            read_task: tokio::sync::Mutex::new(None),
        }
    }

    async fn start(
        &self,
        sink: Arc<dyn InboundSink>,
        parent: CancellationToken,
    ) -> Result<(), TransportError> {
        let reader = self
            .reader
            .lock()
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        let cancel = parent.child_token();
        *self.cancel.lock() = Some(cancel.clone());
        self.connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(read_loop(
            reader,
            sink,
            cancel,
            Arc::clone(&self.connected),
        ));
        *self.read_task.lock().await = Some(handle);
        Ok(())
    }

    async fn send(&self, line: &str) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(TransportError::NotConnected)?;

        writer
            .write_all(line.as_bytes())
            .await
            .map_err(TransportError::WriteError)?;
        writer
            .write_all(b"\n")
            .await
            .map_err(TransportError::WriteError)?;
        writer.flush().await.map_err(TransportError::WriteError)
    }

    /// Fire cancellation so the read loop stops delivering.
    fn cancel(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(cancel) = self.cancel.lock().as_ref() {
            cancel.cancel();
        }
    }

    /// Close the write half; the peer sees end-of-stream.
    async fn close_writer(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Error closing transport writer");
            }
        }
    }

    /// Like [`close_writer`](Self::close_writer), but gives up if a send holds the lock.
    fn try_close_writer(&self) -> bool {
        match self.writer.try_lock() {
            Ok(mut guard) => {
                guard.take();
                true
            }
            Err(_) => false,
        }
    }

    async fn join(&self) {
        if let Some(handle) = self.read_task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Transport read loop panicked");
            }
        }
        // Never started: drop the unused read half too.
        self.reader.lock().take();
    }
}

/// Read one newline-terminated line of raw bytes into `buf`.
///
/// The terminator is stripped. Returns `false` at end of stream. Bytes are
/// not checked for UTF-8 here so a bad line becomes a decode error instead
/// of a read error.
pub(crate) async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(false);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(true)
}

pub(crate) fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

async fn read_loop(
    reader: BoxedReader,
    sink: Arc<dyn InboundSink>,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            read = read_line(&mut reader, &mut line) => match read {
                Ok(true) => {
                    if is_blank(&line) {
                        continue;
                    }
                    match decode_bytes(&line) {
                        Ok(message) => sink.deliver(message),
                        Err(e) => sink.decode_error(&String::from_utf8_lossy(&line), e),
                    }
                }
                Ok(false) => break Some(TransportError::ConnectionClosed),
                Err(e) => break Some(TransportError::ReadError(e)),
            },
        }
    };

    connected.store(false, Ordering::SeqCst);
    match &reason {
        Some(e) => debug!(reason = %e, "Transport read loop ended"),
        None => debug!("Transport read loop cancelled"),
    }
    sink.closed(reason);
}

/// Transport over an arbitrary reader/writer pair.
///
/// Used for in-process pipes and for speaking the protocol on our own
/// stdin/stdout.
pub struct StreamTransport {
    pipes: Pipes,
    stopped: AtomicBool,
}

impl StreamTransport {
    /// Create a transport reading envelopes from `reader` and writing to `writer`.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            pipes: Pipes::new(Box::new(reader), Box::new(writer)),
            stopped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn start(
        &self,
        sink: Arc<dyn InboundSink>,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.pipes.start(sink, cancel).await
    }

    async fn send(&self, line: &str) -> Result<(), TransportError> {
        self.pipes.send(line).await
    }

    async fn stop(&self) -> Result<(), TransportError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pipes.cancel();
        self.pipes.close_writer().await;
        self.pipes.join().await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.pipes.connected.load(Ordering::SeqCst)
    }
}

/// Standard I/O transport for MCP servers.
///
/// This transport spawns a child process and communicates via stdin/stdout
/// using newline-delimited JSON messages. The child's stderr passes through.
pub struct StdioTransport {
    pipes: Pipes,
    child: tokio::sync::Mutex<Option<Child>>,
    pid: Option<u32>,
    grace: Duration,
    stopped: AtomicBool,
}

impl StdioTransport {
    /// Spawn a new stdio transport.
    ///
    /// # Arguments
    ///
    /// * `command` - The command to execute (e.g., "opskills" or "/path/to/server")
    /// * `args` - Command arguments
    /// * `env` - Environment variables to set for the child process
    /// * `working_dir` - Optional working directory for the child process
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: Option<&Path>,
    ) -> Result<Self, TransportError> {
        debug!(command, args = ?args, "Spawning MCP server process");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(TransportError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stdin"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stdout"))
        })?;

        let pid = child.id();
        info!(command, pid = ?pid, "MCP server process spawned");

        Ok(Self {
            pipes: Pipes::new(Box::new(stdout), Box::new(stdin)),
            child: tokio::sync::Mutex::new(Some(child)),
            pid,
            grace: DEFAULT_SHUTDOWN_GRACE,
            stopped: AtomicBool::new(false),
        })
    }

    /// Spawn the server described by `config`.
    pub fn from_config(config: &McpServerConfig) -> Result<Self, TransportError> {
        Self::spawn(
            &config.command,
            &config.args,
            &config.env,
            config.working_dir.as_deref(),
        )
    }

    /// Set how long `stop` waits after SIGTERM before killing.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Get the process ID of the child process.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Terminate the child: SIGTERM, then SIGKILL after the grace period.
    async fn terminate(&self) -> Result<(), TransportError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!(pid = ?self.pid, status = %status, "MCP server already exited");
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                debug!(pid, "Sending SIGTERM to MCP server");
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    debug!(pid, error = %e, "SIGTERM failed");
                }
            }

            tokio::select! {
                status = child.wait() => {
                    debug!(pid = ?self.pid, status = ?status.ok(), "MCP server exited gracefully");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.grace) => {
                    warn!(pid = ?self.pid, "MCP server did not exit gracefully, killing");
                }
            }
        }

        child.kill().await.map_err(TransportError::TerminateFailed)
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(
        &self,
        sink: Arc<dyn InboundSink>,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.pipes.start(sink, cancel).await
    }

    async fn send(&self, line: &str) -> Result<(), TransportError> {
        self.pipes.send(line).await
    }

    async fn stop(&self) -> Result<(), TransportError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!(pid = ?self.pid, "Closing MCP server transport");
        self.pipes.cancel();
        // EOF on stdin is enough for most servers to exit on their own.
        self.pipes.try_close_writer();
        let terminated = self.terminate().await;
        self.pipes.close_writer().await;
        self.pipes.join().await;

        info!(pid = ?self.pid, "MCP server transport closed");
        terminated
    }

    fn is_connected(&self) -> bool {
        self.pipes.connected.load(Ordering::SeqCst)
    }
}
