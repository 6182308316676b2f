use thiserror::Error;

/// Marker the runtime prints when a container id or name is unknown.
const NO_SUCH_CONTAINER: &str = "No such container";
/// Marker the runtime prints when exec targets a stopped container.
const NOT_RUNNING: &str = "is not running";

/// Failures from container runtime invocations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("No such container: {container}")]
    ContainerNotFound { container: String },

    #[error("Container {container} is not running")]
    ContainerNotRunning { container: String },

    #[error("`{command}` exited with code {}: {}", code.map_or("unknown".to_string(), |c| c.to_string()), first_line(stderr))]
    ExecutionFailed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl DockerError {
    /// Refine a generic execution failure against the container it targeted.
    pub fn for_container(self, container: &str) -> Self {
        match self {
            DockerError::ExecutionFailed { ref stderr, .. } if stderr.contains(NO_SUCH_CONTAINER) => {
                DockerError::ContainerNotFound {
                    container: container.to_string(),
                }
            }
            DockerError::ExecutionFailed { ref stderr, .. } if stderr.contains(NOT_RUNNING) => {
                DockerError::ContainerNotRunning {
                    container: container.to_string(),
                }
            }
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DockerError::ContainerNotFound { .. })
    }

    /// Captured (trimmed) stdout and stderr, when the command ran at all.
    pub fn output(&self) -> Option<(&str, &str)> {
        match self {
            DockerError::ExecutionFailed { stdout, stderr, .. } => Some((stdout.trim(), stderr.trim())),
            _ => None,
        }
    }
}

fn first_line(s: &str) -> &str {
    s.trim().lines().next().unwrap_or("").trim()
}
