//! Attached shell processes and the four-capability contract the terminal
//! bridge relies on.
//!
//! PTY reads, writes and waits are all blocking, so a [`PtyProcess`] runs each
//! of them on its own OS thread and exposes the results through tokio
//! channels. The reader and writer are owned by their threads directly, so a
//! blocked read never holds up input or a kill.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use portable_pty::{ChildKiller, CommandBuilder};
use tokio::sync::{mpsc, oneshot};

use crate::pty::{PtyError, PtyHandle, TerminalSize};

/// Chunks of shell output buffered between the reader thread and the consumer.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;

const READ_BUFFER_SIZE: usize = 65536;

/// Exit notification for an attached process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, or `None` if it could not be determined.
    pub code: Option<u32>,
}

/// A running interactive process the terminal bridge can talk to.
///
/// Subscriptions hand out the receiving end of a channel and can only be
/// taken once; later calls return `None`.
pub trait ShellProcess: Send {
    /// Queue raw bytes for the process's input. Bytes are delivered in order.
    fn write(&mut self, data: &[u8]) -> Result<(), PtyError>;

    /// Output chunks in the order the process produced them.
    fn subscribe_output(&mut self) -> Option<mpsc::Receiver<Vec<u8>>>;

    /// Resolves once when the process exits.
    fn subscribe_exit(&mut self) -> Option<oneshot::Receiver<ProcessExit>>;

    /// Terminate the process. Safe to call repeatedly and after exit.
    fn kill(&mut self);
}

/// A child process running inside a PTY.
pub struct PtyProcess {
    label: String,
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    output_rx: Option<mpsc::Receiver<Vec<u8>>>,
    exit_rx: Option<oneshot::Receiver<ProcessExit>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    exited: Arc<AtomicBool>,
    killed: bool,
}

impl PtyProcess {
    /// Spawn `cmd` in a PTY and start its reader, writer and waiter threads.
    ///
    /// `label` names the threads and log lines (e.g. the container id).
    pub fn spawn(cmd: CommandBuilder, size: TerminalSize, label: &str) -> Result<Self, PtyError> {
        let mut handle = PtyHandle::spawn(cmd, size)?;
        let mut killer = handle.killer();
        log::debug!(
            "pty process {label} started (pid {:?}, {}x{})",
            handle.process_id(),
            size.cols,
            size.rows
        );

        let reader = handle
            .take_reader()
            .ok_or_else(|| PtyError::SpawnFailed("PTY reader unavailable".to_string()))?;
        let writer = handle
            .take_writer()
            .ok_or_else(|| PtyError::SpawnFailed("PTY writer unavailable".to_string()))?;

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let exited = Arc::new(AtomicBool::new(false));

        let started = start_reader_thread(label, reader, output_tx)
            .and_then(|()| start_writer_thread(label, writer, input_rx))
            .and_then(|()| start_waiter_thread(label, handle, exit_tx, Arc::clone(&exited)));
        if let Err(e) = started {
            let _ = killer.kill();
            return Err(e);
        }

        Ok(Self {
            label: label.to_string(),
            input_tx,
            output_rx: Some(output_rx),
            exit_rx: Some(exit_rx),
            killer,
            exited,
            killed: false,
        })
    }
}

impl ShellProcess for PtyProcess {
    fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        self.input_tx
            .send(data.to_vec())
            .map_err(|_| PtyError::Closed)
    }

    fn subscribe_output(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.output_rx.take()
    }

    fn subscribe_exit(&mut self) -> Option<oneshot::Receiver<ProcessExit>> {
        self.exit_rx.take()
    }

    fn kill(&mut self) {
        if self.killed || self.exited.load(Ordering::Acquire) {
            return;
        }
        self.killed = true;
        match self.killer.kill() {
            Ok(()) => log::debug!("killed pty process {}", self.label),
            // Losing the race against a natural exit is not an error.
            Err(e) => log::debug!("kill for pty process {} ignored: {e}", self.label),
        }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Read PTY output on a dedicated OS thread and forward it in order.
fn start_reader_thread(
    label: &str,
    mut reader: Box<dyn Read + Send>,
    output_tx: mpsc::Sender<Vec<u8>>,
) -> Result<(), PtyError> {
    std::thread::Builder::new()
        .name(format!("pty-read-{label}"))
        .spawn(move || {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => return, // EOF: PTY closed
                    Ok(n) => n,
                    Err(_) => return, // EIO once the child side is gone
                };
                // Blocks while the consumer is behind; output is never dropped.
                if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                    return;
                }
            }
        })
        .map(|_| ())
        .map_err(|e| PtyError::SpawnFailed(format!("failed to start reader thread: {e}")))
}

/// Write queued input to the PTY on a dedicated OS thread.
fn start_writer_thread(
    label: &str,
    mut writer: Box<dyn Write + Send>,
    mut input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> Result<(), PtyError> {
    std::thread::Builder::new()
        .name(format!("pty-write-{label}"))
        .spawn(move || {
            while let Some(data) = input_rx.blocking_recv() {
                if writer.write_all(&data).and_then(|()| writer.flush()).is_err() {
                    return;
                }
            }
        })
        .map(|_| ())
        .map_err(|e| PtyError::SpawnFailed(format!("failed to start writer thread: {e}")))
}

/// Wait for the child on a dedicated OS thread and report its exit once.
///
/// The thread owns the handle, so the PTY master lives until the child is gone.
fn start_waiter_thread(
    label: &str,
    mut handle: PtyHandle,
    exit_tx: oneshot::Sender<ProcessExit>,
    exited: Arc<AtomicBool>,
) -> Result<(), PtyError> {
    let thread_label = label.to_string();
    std::thread::Builder::new()
        .name(format!("pty-wait-{label}"))
        .spawn(move || {
            let code = match handle.wait() {
                Ok(code) => Some(code),
                Err(e) => {
                    log::warn!("waiting on pty process {thread_label} failed: {e}");
                    None
                }
            };
            exited.store(true, Ordering::Release);
            log::debug!("pty process {thread_label} exited with {code:?}");
            let _ = exit_tx.send(ProcessExit { code });
        })
        .map(|_| ())
        .map_err(|e| PtyError::SpawnFailed(format!("failed to start waiter thread: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(args: &[&str]) -> CommandBuilder {
        let mut cmd = CommandBuilder::new("/bin/sh");
        cmd.args(args);
        cmd
    }

    async fn collect_until(rx: &mut mpsc::Receiver<Vec<u8>>, needle: &str) -> String {
        let mut output = Vec::new();
        let _ = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(chunk) = rx.recv().await {
                output.extend_from_slice(&chunk);
                if String::from_utf8_lossy(&output).contains(needle) {
                    break;
                }
            }
        })
        .await;
        String::from_utf8_lossy(&output).into_owned()
    }

    #[tokio::test]
    async fn test_write_and_receive_output() {
        let mut process = PtyProcess::spawn(sh(&[]), TerminalSize::new(80, 24), "echo").unwrap();
        let mut output = process.subscribe_output().unwrap();

        process.write(b"echo BERTH_PROCESS_OK\n").unwrap();

        let text = collect_until(&mut output, "BERTH_PROCESS_OK\r\n").await;
        assert!(
            text.contains("BERTH_PROCESS_OK"),
            "Expected output to contain BERTH_PROCESS_OK, got: {text}"
        );
    }

    #[tokio::test]
    async fn test_subscriptions_are_taken_once() {
        let mut process = PtyProcess::spawn(sh(&[]), TerminalSize::new(80, 24), "once").unwrap();
        assert!(process.subscribe_output().is_some());
        assert!(process.subscribe_output().is_none());
        assert!(process.subscribe_exit().is_some());
        assert!(process.subscribe_exit().is_none());
    }

    #[tokio::test]
    async fn test_exit_is_reported() {
        let mut process =
            PtyProcess::spawn(sh(&["-c", "exit 0"]), TerminalSize::new(80, 24), "exit").unwrap();
        let exit = process.subscribe_exit().unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(5), exit)
            .await
            .expect("process should exit")
            .expect("exit should be reported");
        assert_eq!(exit, ProcessExit { code: Some(0) });
    }

    #[tokio::test]
    async fn test_kill_terminates_and_is_idempotent() {
        let mut process = PtyProcess::spawn(sh(&[]), TerminalSize::new(80, 24), "kill").unwrap();
        let exit = process.subscribe_exit().unwrap();

        process.kill();
        process.kill();

        let exit = tokio::time::timeout(Duration::from_secs(5), exit).await;
        assert!(exit.is_ok(), "killed process should report an exit");

        // Killing after the exit has been observed is a no-op.
        process.kill();
    }

    #[tokio::test]
    async fn test_output_order_preserved() {
        let script = "for i in 1 2 3 4 5; do echo line$i; done";
        let mut process =
            PtyProcess::spawn(sh(&["-c", script]), TerminalSize::new(80, 24), "order").unwrap();
        let mut output = process.subscribe_output().unwrap();

        let text = collect_until(&mut output, "line5").await;
        let positions: Vec<usize> = (1..=5)
            .map(|i| text.find(&format!("line{i}")).expect("line missing"))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "out of order: {text}");
    }
}
