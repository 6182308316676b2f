use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::DockerError;

/// Captured output of a successful runtime invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Handle on the container runtime binary.
///
/// The command line may carry leading arguments (`sudo docker`,
/// `docker --context build`); they are placed before every subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerCli {
    program: String,
    leading_args: Vec<String>,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    /// Use `program` with no leading arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Parse a whitespace-separated command line such as `sudo docker`.
    pub fn from_command_line(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        let program = parts.next().unwrap_or("docker");
        Self::new(program).with_args(parts)
    }

    /// Append arguments placed before every subcommand.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The full command line, as accepted by [`DockerCli::from_command_line`].
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.leading_args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build a runtime command for the given subcommand arguments.
    pub fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args);
        for arg in args {
            cmd.arg(arg.as_ref());
        }
        cmd
    }

    /// Run to completion and capture output. Non-zero exit is an error.
    pub async fn run<I, S>(&self, args: I) -> Result<CommandOutput, DockerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run_with_input(args, None).await
    }

    /// Like [`DockerCli::run`], feeding `input` to the child's stdin.
    pub async fn run_with_input<I, S>(
        &self,
        args: I,
        input: Option<&[u8]>,
    ) -> Result<CommandOutput, DockerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        let mut cmd = self.command(&args);
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        log::debug!("running {} {}", self.command_line(), args.join(" "));
        let mut child = cmd.spawn().map_err(|source| self.spawn_error(source))?;

        if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
            match stdin.write_all(data).await {
                Ok(()) => {}
                // The child exited without reading; its status says why.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    log::debug!("{} closed stdin early", self.program);
                }
                Err(source) => return Err(self.spawn_error(source)),
            }
            // Dropping stdin closes it so the child sees EOF.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| self.spawn_error(source))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(DockerError::ExecutionFailed {
                command: format!("{} {}", self.command_line(), args.join(" ")),
                code: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }

    pub(crate) fn spawn_error(&self, source: std::io::Error) -> DockerError {
        DockerError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

/// A `DockerCli` whose "runtime" is a shell script, for exercising the
/// typed operations without a container runtime.
#[cfg(test)]
pub(crate) fn scripted(script: &str) -> DockerCli {
    DockerCli::new("/bin/sh").with_args(["-c", script, "docker"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_command_line() {
        let cli = DockerCli::from_command_line("sudo docker --context build");
        assert_eq!(cli.program(), "sudo");
        assert_eq!(cli.command_line(), "sudo docker --context build");

        let plain = DockerCli::from_command_line("  ");
        assert_eq!(plain, DockerCli::default());
    }

    #[tokio::test]
    async fn test_run_captures_output() {
        let cli = scripted(r#"echo "args: $*"; echo warn >&2"#);
        let output = cli.run(["ps", "-a"]).await.unwrap();
        assert_eq!(output.stdout, "args: ps -a\n");
        assert_eq!(output.stderr, "warn\n");
    }

    #[tokio::test]
    async fn test_run_reports_failure() {
        let cli = scripted("echo partial; echo boom >&2; exit 7");
        let err = cli.run(["inspect", "web"]).await.unwrap_err();
        match err {
            DockerError::ExecutionFailed {
                code,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(code, Some(7));
                assert_eq!(stdout, "partial\n");
                assert_eq!(stderr, "boom\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_with_input_feeds_stdin() {
        let cli = scripted("cat");
        let output = cli.run_with_input(["exec"], Some(b"hello")).await.unwrap();
        assert_eq!(output.stdout, "hello");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let cli = DockerCli::new("/nonexistent/berth-docker");
        let err = cli.run(["ps"]).await.unwrap_err();
        assert!(matches!(err, DockerError::Spawn { .. }));
    }
}
