use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use crate::cli::DockerCli;

/// Failures while opening a public tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Timeout waiting for tunnel URL")]
    Timeout,
    #[error("Tunnel closed before URL was obtained")]
    Closed { code: Option<i32> },
    #[error("Failed to start tunnel: {0}")]
    Spawn(#[source] std::io::Error),
}

fn tunnel_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"https://[-a-zA-Z0-9@:%._+~#=]+\.trycloudflare\.com")
            .expect("tunnel URL pattern is valid")
    })
}

/// First quick-tunnel URL in a line of tunnel client output.
pub fn find_tunnel_url(text: &str) -> Option<&str> {
    tunnel_url_pattern().find(text).map(|m| m.as_str())
}

impl DockerCli {
    /// Start a quick tunnel to `localhost:<port>` inside the container and
    /// return its public URL.
    ///
    /// The tunnel client keeps running after the URL is found. If no URL shows
    /// up within `timeout` the client is killed.
    pub async fn open_tunnel(
        &self,
        container: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<String, TunnelError> {
        let target = format!("http://localhost:{port}");
        let mut cmd = self.command(["exec", container, "cloudflared", "tunnel", "--url", target.as_str()]);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(TunnelError::Spawn)?;

        // cloudflared logs to stderr, but the URL has been seen on either stream.
        let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx.clone(), "stderr"));
        }
        drop(line_tx);

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                line = line_rx.recv() => match line {
                    Some(line) => {
                        if let Some(url) = find_tunnel_url(&line) {
                            let url = url.to_string();
                            let label = container.to_string();
                            tokio::spawn(async move {
                                match child.wait().await {
                                    Ok(status) => log::info!("tunnel for {label} exited with {status}"),
                                    Err(e) => log::warn!("tunnel for {label} could not be awaited: {e}"),
                                }
                            });
                            return Ok(url);
                        }
                    }
                    None => {
                        let code = child.wait().await.ok().and_then(|s| s.code());
                        log::warn!("tunnel for {container} closed before a URL appeared ({code:?})");
                        return Err(TunnelError::Closed { code });
                    }
                },
                _ = &mut deadline => {
                    log::warn!("no tunnel URL for {container} after {timeout:?}, killing client");
                    let _ = child.kill().await;
                    return Err(TunnelError::Timeout);
                }
            }
        }
    }
}

/// Forward lines until EOF. Keeps draining after the receiver is gone so the
/// tunnel client never blocks on a full pipe.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::debug!("[cloudflared {stream}] {line}");
        if !tx.is_closed() {
            let _ = tx.send(line).await;
        }
    }
}
