//! berth-docker: typed wrappers around the container runtime CLI.
//!
//! Every operation builds an argument vector and runs the runtime binary
//! through [`DockerCli`]. Failures are classified once, here, into
//! [`DockerError`] kinds so callers never inspect error text.

pub mod cli;
pub mod containers;
pub mod error;
pub mod exec;
pub mod files;
pub mod tunnel;

pub use cli::{CommandOutput, DockerCli};
pub use containers::{is_valid_subdomain, ProxyRoute, RunSpec};
pub use error::DockerError;
pub use exec::{ExecSpec, StreamEvent};
pub use files::{join_path, parent_dir};
pub use tunnel::{find_tunnel_url, TunnelError};
