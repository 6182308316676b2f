//! berth-pty: pseudo-terminal processes for interactive container shells.
//!
//! # Architecture
//!
//! - [`PtyHandle`] — Low-level PTY process management (spawn, reader, writer, wait).
//! - [`PtyProcess`] — A running PTY child driven by dedicated I/O threads and
//!   exposed through the [`ShellProcess`] contract (write, output, exit, kill).
//! - [`DockerShellAttacher`] — Builds `docker exec -it` shells for a container
//!   behind the [`ShellAttacher`] trait.

pub mod attach;
pub mod process;
pub mod pty;

pub use attach::{AttachOptions, DockerShellAttacher, ShellAttacher};
pub use process::{ProcessExit, PtyProcess, ShellProcess};
pub use pty::{PtyError, PtyHandle, TerminalSize};
