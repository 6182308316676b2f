use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::cli::{CommandOutput, DockerCli};
use crate::error::DockerError;

/// Shell used to interpret exec commands inside the container.
const EXEC_SHELL: &str = "/bin/sh";

const STREAM_CHANNEL_CAPACITY: usize = 64;
const STREAM_READ_SIZE: usize = 8192;

/// A command to run inside a container through `/bin/sh -c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub container: String,
    pub command: String,
    pub workdir: Option<String>,
}

impl ExecSpec {
    pub fn new(container: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            command: command.into(),
            workdir: None,
        }
    }

    pub fn workdir(mut self, workdir: Option<String>) -> Self {
        self.workdir = workdir.filter(|w| !w.is_empty());
        self
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if let Some(workdir) = &self.workdir {
            args.extend(["-w".to_string(), workdir.clone()]);
        }
        args.extend([
            self.container.clone(),
            EXEC_SHELL.to_string(),
            "-c".to_string(),
            self.command.clone(),
        ]);
        args
    }
}

/// Progress of a streamed exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Bytes from stdout or stderr, in the order each stream produced them.
    Output(Vec<u8>),
    /// The process finished; `None` when it was killed by a signal.
    Exited(Option<i32>),
    /// The process could not be started or waited on.
    Failed(String),
}

impl DockerCli {
    /// Run a command to completion inside a container.
    pub async fn exec(&self, spec: &ExecSpec) -> Result<CommandOutput, DockerError> {
        self.run(spec.to_args())
            .await
            .map_err(|e| e.for_container(&spec.container))
    }

    /// Run a command inside a container and stream its output as it arrives.
    ///
    /// The returned channel ends after exactly one `Exited` or `Failed` event.
    /// Dropping the receiver kills the process.
    pub fn exec_stream(&self, spec: &ExecSpec) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let mut cmd = self.command(spec.to_args());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let container = spec.container.clone();

        tokio::spawn(async move {
            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    let _ = tx.send(StreamEvent::Failed(e.to_string())).await;
                    return;
                }
            };

            let pumps: Vec<_> = [
                child.stdout.take().map(|s| tokio::spawn(pump(s, tx.clone()))),
                child.stderr.take().map(|s| tokio::spawn(pump(s, tx.clone()))),
            ]
            .into_iter()
            .flatten()
            .collect();

            // The consumer going away ends the command even if it is silent.
            let status = tokio::select! {
                status = async {
                    for pump in pumps {
                        let _ = pump.await;
                    }
                    child.wait().await
                } => Some(status),
                _ = tx.closed() => None,
            };

            let event = match status {
                Some(Ok(status)) => StreamEvent::Exited(status.code()),
                Some(Err(e)) => StreamEvent::Failed(e.to_string()),
                None => {
                    log::debug!("stream consumer for {container} went away, killing exec");
                    let _ = child.kill().await;
                    return;
                }
            };
            let _ = tx.send(event).await;
        });

        rx
    }
}

async fn pump<R>(mut reader: R, tx: mpsc::Sender<StreamEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; STREAM_READ_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if tx.send(StreamEvent::Output(buf[..n].to_vec())).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::scripted;
    use std::time::Duration;

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> (Vec<u8>, Vec<StreamEvent>) {
        let mut output = Vec::new();
        let mut terminal = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Output(bytes) => output.extend(bytes),
                other => terminal.push(other),
            }
        }
        (output, terminal)
    }

    #[test]
    fn test_exec_args() {
        let spec = ExecSpec::new("web", "ls -la \"my dir\"");
        assert_eq!(
            spec.to_args(),
            vec!["exec", "web", "/bin/sh", "-c", "ls -la \"my dir\""]
        );

        let spec = spec.workdir(Some("/app".to_string()));
        assert_eq!(
            spec.to_args(),
            vec!["exec", "-w", "/app", "web", "/bin/sh", "-c", "ls -la \"my dir\""]
        );
    }

    #[test]
    fn test_empty_workdir_is_ignored() {
        let spec = ExecSpec::new("web", "pwd").workdir(Some(String::new()));
        assert_eq!(spec.workdir, None);
    }

    #[tokio::test]
    async fn test_exec_classifies_missing_container() {
        let cli = scripted("echo 'Error: No such container: ghost' >&2; exit 1");
        let err = cli.exec(&ExecSpec::new("ghost", "true")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_exec_stream_relays_output_then_exit() {
        let cli = scripted("echo one; echo two; exit 3");
        let (output, terminal) = drain(cli.exec_stream(&ExecSpec::new("web", "true"))).await;
        assert_eq!(String::from_utf8_lossy(&output), "one\ntwo\n");
        assert_eq!(terminal, vec![StreamEvent::Exited(Some(3))]);
    }

    #[tokio::test]
    async fn test_exec_stream_includes_stderr() {
        let cli = scripted("echo oops >&2");
        let (output, terminal) = drain(cli.exec_stream(&ExecSpec::new("web", "true"))).await;
        assert_eq!(String::from_utf8_lossy(&output), "oops\n");
        assert_eq!(terminal, vec![StreamEvent::Exited(Some(0))]);
    }

    #[tokio::test]
    async fn test_dropping_stream_kills_silent_command() {
        let cli = scripted("echo $$; exec sleep 30");
        let mut rx = cli.exec_stream(&ExecSpec::new("web", "true"));
        let pid = match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(StreamEvent::Output(bytes))) => String::from_utf8(bytes).unwrap().trim().to_string(),
            other => panic!("expected the pid first, got {other:?}"),
        };
        drop(rx);

        let alive = || {
            std::process::Command::new("/bin/sh")
                .args(["-c", &format!("kill -0 {pid} 2>/dev/null")])
                .status()
                .unwrap()
                .success()
        };
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while alive() {
            assert!(
                std::time::Instant::now() < deadline,
                "exec {pid} still running after its stream was dropped"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn test_exec_stream_spawn_failure() {
        let cli = DockerCli::new("/nonexistent/berth-docker");
        let (output, terminal) = drain(cli.exec_stream(&ExecSpec::new("web", "true"))).await;
        assert!(output.is_empty());
        assert!(matches!(terminal.as_slice(), [StreamEvent::Failed(_)]));
    }
}
