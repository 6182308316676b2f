//! Per-connection session state machine between a terminal client and an
//! interactive shell.
//!
//! A session starts in [`SessionPhase::AwaitingStart`]. The first inbound
//! frame must be a start directive; anything else is answered with a text
//! error and the connection is closed. Once attached, every inbound frame is
//! written verbatim to the shell and every output chunk is forwarded verbatim
//! to the client. The session ends when the shell exits, the client goes
//! away, the transport fails, or the server shuts down. Teardown runs once.

use std::sync::Arc;
use std::time::Duration;

use berth_pty::{ProcessExit, ShellAttacher, ShellProcess};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::protocol::ControlMessage;
use crate::state::SessionGuard;

/// Sent to the client when the shell exits, just before the close frame.
pub const EXIT_NOTICE: &str = "\r\n[process exited]";

/// How long to wait for trailing output after the shell has exited.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Events from the client side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text or binary frame's payload.
    Frame(Vec<u8>),
    /// The transport failed.
    Error(String),
    /// The client closed the connection.
    Closed,
}

/// Frames to send to the client, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    /// Close the connection. Always the last frame of a session.
    Close,
}

/// Frames shell output without altering its bytes.
///
/// Reads can end in the middle of a multi-byte character. The incomplete
/// tail is held back and joined with the next chunk, so text output stays
/// text. Only bytes that can never become valid UTF-8 go out as binary.
#[derive(Debug, Default)]
pub struct OutputFramer {
    pending: Vec<u8>,
}

impl OutputFramer {
    pub fn frame(&mut self, chunk: Vec<u8>) -> Option<Outbound> {
        let bytes = if self.pending.is_empty() {
            chunk
        } else {
            let mut bytes = std::mem::take(&mut self.pending);
            bytes.extend_from_slice(&chunk);
            bytes
        };

        match String::from_utf8(bytes) {
            Ok(text) if text.is_empty() => None,
            Ok(text) => Some(Outbound::Text(text)),
            Err(e) if e.utf8_error().error_len().is_some() => {
                Some(Outbound::Binary(e.into_bytes()))
            }
            Err(e) => {
                let valid_up_to = e.utf8_error().valid_up_to();
                let mut bytes = e.into_bytes();
                self.pending = bytes.split_off(valid_up_to);
                if bytes.is_empty() {
                    return None;
                }
                Some(
                    String::from_utf8(bytes)
                        .map_or_else(|e| Outbound::Binary(e.into_bytes()), Outbound::Text),
                )
            }
        }
    }

    /// Release a held partial character, as binary since it never completed.
    pub fn flush(&mut self) -> Option<Outbound> {
        if self.pending.is_empty() {
            None
        } else {
            Some(Outbound::Binary(std::mem::take(&mut self.pending)))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingStart,
    Attached,
    Closed,
}

pub struct TerminalBridge {
    guard: SessionGuard,
    attacher: Arc<dyn ShellAttacher>,
    outbound: mpsc::Sender<Outbound>,
    phase: SessionPhase,
    process: Option<Box<dyn ShellProcess>>,
    output_rx: Option<mpsc::Receiver<Vec<u8>>>,
    exit_rx: Option<oneshot::Receiver<ProcessExit>>,
    framer: OutputFramer,
}

impl TerminalBridge {
    pub fn new(
        guard: SessionGuard,
        attacher: Arc<dyn ShellAttacher>,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            guard,
            attacher,
            outbound,
            phase: SessionPhase::AwaitingStart,
            process: None,
            output_rx: None,
            exit_rx: None,
            framer: OutputFramer::default(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Drive the session until it closes.
    ///
    /// Events are handled one at a time; the end of `inbound` counts as the
    /// client closing the connection.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Inbound>) {
        let cancel = self.guard.cancel_token();

        while self.phase != SessionPhase::Closed {
            tokio::select! {
                _ = cancel.cancelled() => self.on_shutdown().await,
                chunk = next_output(&mut self.output_rx) => match chunk {
                    Some(chunk) => self.on_process_output(chunk).await,
                    // Reader finished; the exit notification follows.
                    None => self.output_rx = None,
                },
                exit = next_exit(&mut self.exit_rx) => {
                    self.exit_rx = None;
                    self.on_process_exit(exit).await;
                }
                event = inbound.recv() => match event {
                    Some(Inbound::Frame(data)) => self.on_message(data).await,
                    Some(Inbound::Error(err)) => self.on_connection_error(&err).await,
                    Some(Inbound::Closed) | None => self.on_connection_close().await,
                },
            }
        }

        log::debug!("terminal session {} finished", self.guard.id());
    }

    /// An inbound frame: a start directive before attach, shell input after.
    pub async fn on_message(&mut self, data: Vec<u8>) {
        match self.phase {
            SessionPhase::AwaitingStart => match ControlMessage::parse(&data) {
                ControlMessage::Start { container_id } => self.attach(container_id).await,
                ControlMessage::Invalid(reason) => {
                    log::info!(
                        "terminal session {} rejected first message: {}",
                        self.guard.id(),
                        reason.message()
                    );
                    self.send(Outbound::Text(reason.message().to_string())).await;
                    self.close(false).await;
                }
            },
            SessionPhase::Attached => {
                let Some(process) = self.process.as_mut() else {
                    return;
                };
                if let Err(e) = process.write(&data) {
                    log::warn!("terminal session {} input failed: {e}", self.guard.id());
                    self.send(Outbound::Text(EXIT_NOTICE.to_string())).await;
                    self.close(true).await;
                }
            }
            SessionPhase::Closed => {}
        }
    }

    pub async fn on_process_output(&mut self, chunk: Vec<u8>) {
        if self.phase == SessionPhase::Attached {
            self.forward_output(chunk).await;
        }
    }

    /// The shell exited: flush what it printed last, tell the client, close.
    pub async fn on_process_exit(&mut self, exit: Option<ProcessExit>) {
        if self.phase != SessionPhase::Attached {
            return;
        }
        log::info!(
            "terminal session {} shell exited with {:?}",
            self.guard.id(),
            exit.and_then(|e| e.code)
        );

        if let Some(mut rx) = self.output_rx.take() {
            let deadline = Instant::now() + EXIT_DRAIN_TIMEOUT;
            while let Ok(Some(chunk)) = tokio::time::timeout_at(deadline, rx.recv()).await {
                self.forward_output(chunk).await;
            }
        }
        if let Some(tail) = self.framer.flush() {
            self.send(tail).await;
        }

        self.send(Outbound::Text(EXIT_NOTICE.to_string())).await;
        self.close(false).await;
    }

    pub async fn on_connection_close(&mut self) {
        if self.phase != SessionPhase::Closed {
            log::info!("terminal session {} closed by client", self.guard.id());
        }
        self.close(true).await;
    }

    pub async fn on_connection_error(&mut self, err: &str) {
        if self.phase != SessionPhase::Closed {
            log::warn!("terminal session {} transport error: {err}", self.guard.id());
        }
        self.close(true).await;
    }

    async fn on_shutdown(&mut self) {
        log::debug!("terminal session {} closing for shutdown", self.guard.id());
        self.close(true).await;
    }

    async fn attach(&mut self, container_id: String) {
        let attacher = Arc::clone(&self.attacher);
        let target = container_id.clone();
        let attached = tokio::task::spawn_blocking(move || attacher.attach(&target)).await;

        let mut process = match attached {
            Ok(Ok(process)) => process,
            Ok(Err(e)) => {
                log::warn!("failed to attach to {container_id}: {e}");
                self.spawn_failed().await;
                return;
            }
            Err(e) => {
                log::error!("attach task for {container_id} failed: {e}");
                self.spawn_failed().await;
                return;
            }
        };

        match (process.subscribe_output(), process.subscribe_exit()) {
            (Some(output), Some(exit)) => {
                self.output_rx = Some(output);
                self.exit_rx = Some(exit);
            }
            _ => {
                log::error!("shell for {container_id} has no output or exit subscription");
                process.kill();
                self.spawn_failed().await;
                return;
            }
        }

        log::info!(
            "terminal session {} attached to {container_id}",
            self.guard.id()
        );
        self.guard.mark_attached(&container_id);
        self.process = Some(process);
        self.phase = SessionPhase::Attached;
    }

    /// A shell that never started is reported like one that exited at once.
    async fn spawn_failed(&mut self) {
        self.send(Outbound::Text(EXIT_NOTICE.to_string())).await;
        self.close(false).await;
    }

    /// Release the session's resources and close the connection. Runs once;
    /// `kill` terminates a still-attached shell.
    async fn close(&mut self, kill: bool) {
        if self.phase == SessionPhase::Closed {
            return;
        }
        self.phase = SessionPhase::Closed;

        if let Some(mut process) = self.process.take() {
            if kill {
                process.kill();
            }
        }
        self.output_rx = None;
        self.exit_rx = None;

        self.send(Outbound::Close).await;
    }

    async fn forward_output(&mut self, chunk: Vec<u8>) {
        if let Some(frame) = self.framer.frame(chunk) {
            self.send(frame).await;
        }
    }

    async fn send(&mut self, frame: Outbound) {
        if self.outbound.send(frame).await.is_err() {
            log::debug!(
                "terminal session {} outbound channel closed",
                self.guard.id()
            );
        }
    }
}

async fn next_output(rx: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// `None` when the exit sender went away without reporting.
async fn next_exit(rx: &mut Option<oneshot::Receiver<ProcessExit>>) -> Option<ProcessExit> {
    match rx {
        Some(rx) => rx.await.ok(),
        None => std::future::pending().await,
    }
}
