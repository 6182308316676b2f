//! Application state shared between HTTP handlers and terminal connections.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use berth_docker::DockerCli;
use berth_pty::{DockerShellAttacher, ShellAttacher};
use tokio_util::sync::CancellationToken;

use crate::config::Config;

pub type ConnectionId = u64;

/// Registry record for one live terminal connection.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub peer: Option<SocketAddr>,
    pub connected_at: Instant,
    /// Set once the connection has attached to a container.
    pub container_id: Option<String>,
}

/// Tracks live terminal connections and lets the server close them all.
///
/// Each connection holds a [`SessionGuard`]; dropping it removes the entry.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<ConnectionId, SessionEntry>>>,
    next_id: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    /// Sessions are cancelled when `shutdown` is.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            shutdown,
        }
    }

    /// Register a newly accepted connection.
    pub fn register(&self, peer: Option<SocketAddr>) -> SessionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(
                id,
                SessionEntry {
                    peer,
                    connected_at: Instant::now(),
                    container_id: None,
                },
            );
        }
        SessionGuard {
            id,
            registry: self.clone(),
            cancel: self.shutdown.child_token(),
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<SessionEntry> {
        self.sessions.lock().ok()?.get(&id).cloned()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signal every live session to tear down.
    pub fn close_all(&self) {
        if let Ok(sessions) = self.sessions.lock() {
            for (id, entry) in sessions.iter() {
                log::debug!(
                    "closing terminal session {id} ({}, container {}, open {:?})",
                    entry.peer.map_or_else(|| "unknown peer".to_string(), |p| p.to_string()),
                    entry.container_id.as_deref().unwrap_or("none"),
                    entry.connected_at.elapsed()
                );
            }
        }
        self.shutdown.cancel();
    }

    fn set_container(&self, id: ConnectionId, container_id: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            if let Some(entry) = sessions.get_mut(&id) {
                entry.container_id = Some(container_id.to_string());
            }
        }
    }

    fn remove(&self, id: ConnectionId) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&id);
        }
    }
}

/// A connection's membership in the registry.
pub struct SessionGuard {
    id: ConnectionId,
    registry: SessionRegistry,
    cancel: CancellationToken,
}

impl SessionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Cancelled when the server shuts down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn mark_attached(&self, container_id: &str) {
        self.registry.set_container(self.id, container_id);
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

/// Everything handlers need, injected through axum's `State`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub docker: DockerCli,
    pub attacher: Arc<dyn ShellAttacher>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(config: Config, shutdown: CancellationToken) -> Self {
        let attacher = Arc::new(DockerShellAttacher::new(config.attach_options()));
        Self::with_attacher(config, attacher, shutdown)
    }

    pub fn with_attacher(
        config: Config,
        attacher: Arc<dyn ShellAttacher>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            docker: DockerCli::from_command_line(&config.docker_bin),
            config: Arc::new(config),
            attacher,
            sessions: SessionRegistry::new(shutdown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_assigns_increasing_ids() {
        let registry = SessionRegistry::new(CancellationToken::new());
        let a = registry.register(None);
        let b = registry.register(None);
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_guard_drop_unregisters() {
        let registry = SessionRegistry::new(CancellationToken::new());
        let guard = registry.register(Some("127.0.0.1:5000".parse().unwrap()));
        let id = guard.id();
        assert_eq!(
            registry.get(id).and_then(|e| e.peer),
            Some("127.0.0.1:5000".parse().unwrap())
        );

        drop(guard);
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_mark_attached_records_container() {
        let registry = SessionRegistry::new(CancellationToken::new());
        let guard = registry.register(None);
        assert_eq!(registry.get(guard.id()).unwrap().container_id, None);

        guard.mark_attached("abc123");
        assert_eq!(
            registry.get(guard.id()).unwrap().container_id.as_deref(),
            Some("abc123")
        );
    }

    #[test]
    fn test_close_all_cancels_sessions() {
        let registry = SessionRegistry::new(CancellationToken::new());
        let a = registry.register(None);
        let b = registry.register(None);
        assert!(!a.cancel_token().is_cancelled());

        registry.close_all();
        assert!(a.cancel_token().is_cancelled());
        assert!(b.cancel_token().is_cancelled());
    }

    #[test]
    fn test_app_state_uses_configured_runtime() {
        let mut config = crate::config::test_config();
        config.docker_bin = "sudo docker".to_string();
        let state = AppState::new(config, CancellationToken::new());
        assert_eq!(state.docker.command_line(), "sudo docker");
        assert!(state.sessions.is_empty());
    }
}
