use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;

/// Errors from PTY operations.
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("PTY spawn failed: {0}")]
    SpawnFailed(String),
    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("process input is closed")]
    Closed,
}

/// Dimensions of the virtual terminal handed to the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    fn to_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Owns a portable-pty child process and the master side of its terminal.
///
/// The reader and writer can be taken out once so they can be driven from
/// dedicated threads; the handle itself stays with whoever waits on the child.
pub struct PtyHandle {
    _master: Box<dyn MasterPty + Send>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyHandle {
    /// Spawn `cmd` attached to a freshly opened PTY of the given size.
    pub fn spawn(cmd: CommandBuilder, size: TerminalSize) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(size.to_pty_size())
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(format!("failed to spawn command: {e}")))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to take writer: {e}")))?;

        // The slave end is dropped here so the reader sees EOF once the child
        // and everything it forked have exited.
        Ok(Self {
            _master: pair.master,
            reader: Some(reader),
            writer: Some(writer),
            child,
        })
    }

    /// Take the PTY reader (shell output). Returns `None` if already taken.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// Take the PTY writer (shell input). Returns `None` if already taken.
    pub fn take_writer(&mut self) -> Option<Box<dyn Write + Send>> {
        self.writer.take()
    }

    /// A killer that can signal the child while another thread waits on it.
    pub fn killer(&self) -> Box<dyn ChildKiller + Send + Sync> {
        self.child.clone_killer()
    }

    /// OS process id of the child, if the platform reports one.
    pub fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Block until the child exits and return its exit code.
    pub fn wait(&mut self) -> Result<u32, PtyError> {
        let status = self.child.wait()?;
        Ok(status.exit_code())
    }
}
