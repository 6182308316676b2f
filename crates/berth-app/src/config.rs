//! Command-line and environment configuration.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use berth_pty::{AttachOptions, TerminalSize};
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "berth",
    version,
    about = "Single-host container control plane with interactive terminals"
)]
pub struct Config {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: IpAddr,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Container runtime command line (e.g. `docker` or `sudo docker`).
    #[arg(long, env = "DOCKER_BIN", default_value = "docker")]
    pub docker_bin: String,

    /// Shell started by interactive terminal sessions.
    #[arg(long, env = "TERMINAL_SHELL", default_value = berth_pty::attach::DEFAULT_SHELL)]
    pub terminal_shell: String,

    /// TERM advertised to interactive shells.
    #[arg(long, env = "TERMINAL_TERM", default_value = berth_pty::attach::DEFAULT_TERM)]
    pub terminal_term: String,

    #[arg(long, env = "TERMINAL_COLS", default_value_t = berth_pty::attach::DEFAULT_COLS)]
    pub terminal_cols: u16,

    #[arg(long, env = "TERMINAL_ROWS", default_value_t = berth_pty::attach::DEFAULT_ROWS)]
    pub terminal_rows: u16,

    /// Volume mounted into started containers that request none.
    #[arg(long, env = "DEFAULT_VOLUME")]
    pub default_volume: Option<String>,

    /// Network shared with the reverse proxy.
    #[arg(long, env = "PROXY_NETWORK", default_value = "proxy")]
    pub proxy_network: String,

    /// Domain that routed subdomains are created under.
    #[arg(long, env = "DOMAIN_SUFFIX", default_value = "localhost")]
    pub domain_suffix: String,

    /// Certificate resolver the proxy uses for routed containers.
    #[arg(long, env = "TLS_RESOLVER", default_value = "letsencrypt")]
    pub tls_resolver: String,

    /// Seconds to wait for a tunnel URL before giving up.
    #[arg(long, env = "TUNNEL_TIMEOUT_SECS", default_value_t = 15)]
    pub tunnel_timeout_secs: u64,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn attach_options(&self) -> AttachOptions {
        AttachOptions {
            runtime: self.docker_bin.clone(),
            shell: self.terminal_shell.clone(),
            term: self.terminal_term.clone(),
            size: TerminalSize::new(self.terminal_cols, self.terminal_rows),
        }
    }

    pub fn tunnel_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_timeout_secs)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config::try_parse_from([
        "berth",
        "--port",
        "0",
        "--docker-bin",
        "docker",
        "--terminal-cols",
        "500",
        "--terminal-rows",
        "100",
        "--domain-suffix",
        "apps.example.com",
    ])
    .expect("test config parses")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_addr() {
        let config = Config::try_parse_from(["berth", "--bind-addr", "127.0.0.1", "--port", "8080"])
            .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn test_attach_options_from_flags() {
        let config = Config::try_parse_from([
            "berth",
            "--docker-bin",
            "sudo docker",
            "--terminal-shell",
            "/bin/bash",
            "--terminal-term",
            "xterm-256color",
            "--terminal-cols",
            "200",
            "--terminal-rows",
            "50",
        ])
        .unwrap();
        let options = config.attach_options();
        assert_eq!(options.runtime, "sudo docker");
        assert_eq!(options.shell, "/bin/bash");
        assert_eq!(options.term, "xterm-256color");
        assert_eq!(options.size, TerminalSize::new(200, 50));
    }

    #[test]
    fn test_tunnel_timeout() {
        let config = Config::try_parse_from(["berth", "--tunnel-timeout-secs", "3"]).unwrap();
        assert_eq!(config.tunnel_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_helper_config() {
        let config = test_config();
        assert_eq!(config.domain_suffix, "apps.example.com");
        assert_eq!(config.attach_options().size, TerminalSize::new(500, 100));
    }
}
