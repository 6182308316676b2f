use portable_pty::CommandBuilder;

use crate::process::{PtyProcess, ShellProcess};
use crate::pty::{PtyError, TerminalSize};

/// Default terminal width; wide enough that full-screen tools don't wrap.
pub const DEFAULT_COLS: u16 = 500;
/// Default terminal height.
pub const DEFAULT_ROWS: u16 = 100;
/// Colour-capable terminal type advertised to the shell.
pub const DEFAULT_TERM: &str = "xterm-color";
/// Shell started inside the container.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Spawns interactive shells attached to containers.
pub trait ShellAttacher: Send + Sync + 'static {
    /// Start an interactive shell inside `container_id`.
    ///
    /// Blocking: callers on an async runtime should use `spawn_blocking`.
    fn attach(&self, container_id: &str) -> Result<Box<dyn ShellProcess>, PtyError>;
}

/// How attached shells are launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachOptions {
    /// Container runtime command line, e.g. `docker` or `sudo docker`.
    pub runtime: String,
    pub shell: String,
    pub term: String,
    pub size: TerminalSize,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            shell: DEFAULT_SHELL.to_string(),
            term: DEFAULT_TERM.to_string(),
            size: TerminalSize::new(DEFAULT_COLS, DEFAULT_ROWS),
        }
    }
}

/// Attaches with `docker exec -it <container> <shell>` inside a local PTY.
#[derive(Debug, Clone, Default)]
pub struct DockerShellAttacher {
    options: AttachOptions,
}

impl DockerShellAttacher {
    pub fn new(options: AttachOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AttachOptions {
        &self.options
    }

    /// Build the command that attaches a shell to `container_id`.
    pub fn command(&self, container_id: &str) -> CommandBuilder {
        let mut parts = self.options.runtime.split_whitespace();
        let program = parts.next().unwrap_or("docker");

        let mut cmd = CommandBuilder::new(program);
        cmd.args(parts);
        cmd.args(["exec", "-it", "-e"]);
        cmd.arg(format!("TERM={}", self.options.term));
        cmd.arg(container_id);
        cmd.arg(&self.options.shell);
        cmd.env("TERM", &self.options.term);
        cmd
    }
}

impl ShellAttacher for DockerShellAttacher {
    fn attach(&self, container_id: &str) -> Result<Box<dyn ShellProcess>, PtyError> {
        if container_id.starts_with('-') {
            return Err(PtyError::SpawnFailed(format!(
                "invalid container id {container_id:?}"
            )));
        }
        let process = PtyProcess::spawn(self.command(container_id), self.options.size, container_id)?;
        Ok(Box::new(process))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::time::Duration;

    fn argv(cmd: &CommandBuilder) -> Vec<String> {
        cmd.get_argv()
            .iter()
            .map(|a: &OsString| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_default_options() {
        let options = AttachOptions::default();
        assert_eq!(options.runtime, "docker");
        assert_eq!(options.shell, "/bin/sh");
        assert_eq!(options.term, "xterm-color");
        assert_eq!(options.size, TerminalSize::new(500, 100));
    }

    #[test]
    fn test_command_targets_container() {
        let attacher = DockerShellAttacher::default();
        let cmd = attacher.command("abc123");
        assert_eq!(
            argv(&cmd),
            vec!["docker", "exec", "-it", "-e", "TERM=xterm-color", "abc123", "/bin/sh"]
        );
        assert_eq!(
            cmd.get_env("TERM").map(|v| v.to_string_lossy().into_owned()),
            Some("xterm-color".to_string())
        );
    }

    #[test]
    fn test_runtime_with_leading_args() {
        let attacher = DockerShellAttacher::new(AttachOptions {
            runtime: "sudo docker".to_string(),
            shell: "/bin/bash".to_string(),
            ..AttachOptions::default()
        });
        let cmd = attacher.command("web");
        assert_eq!(
            argv(&cmd),
            vec!["sudo", "docker", "exec", "-it", "-e", "TERM=xterm-color", "web", "/bin/bash"]
        );
    }

    #[test]
    fn test_option_like_container_id_is_refused() {
        let attacher = DockerShellAttacher::default();
        assert!(matches!(
            attacher.attach("--privileged"),
            Err(PtyError::SpawnFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_runtime_behaves_like_exit() {
        // A runtime that isn't installed either fails to spawn or exits at once;
        // both surface to the caller without a live process being left behind.
        let attacher = DockerShellAttacher::new(AttachOptions {
            runtime: "/nonexistent/berth-runtime".to_string(),
            ..AttachOptions::default()
        });
        match attacher.attach("abc123") {
            Err(_) => {}
            Ok(mut process) => {
                let exit = process.subscribe_exit().unwrap();
                let exit = tokio::time::timeout(Duration::from_secs(5), exit).await;
                assert!(exit.is_ok(), "process for a missing runtime should exit");
            }
        }
    }
}
