use std::collections::BTreeMap;

use crate::cli::DockerCli;
use crate::error::DockerError;

/// Command that keeps a container alive when no command is given.
const KEEPALIVE_COMMAND: [&str; 3] = ["tail", "-f", "/dev/null"];

/// Reverse-proxy routing for a container: `https://<subdomain>.<domain>`
/// terminated with TLS by the proxy and forwarded to `port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub router: String,
    pub host: String,
    pub port: u16,
    pub network: String,
    pub tls_resolver: String,
}

impl ProxyRoute {
    pub fn new(
        subdomain: &str,
        domain_suffix: &str,
        port: u16,
        network: &str,
        tls_resolver: &str,
    ) -> Self {
        let subdomain = subdomain.to_ascii_lowercase();
        Self {
            router: subdomain.replace('.', "-"),
            host: format!("{subdomain}.{}", domain_suffix.trim_start_matches('.')),
            port,
            network: network.to_string(),
            tls_resolver: tls_resolver.to_string(),
        }
    }

    pub fn url(&self) -> String {
        format!("https://{}", self.host)
    }

    /// Container labels understood by the proxy.
    pub fn labels(&self) -> Vec<String> {
        let r = &self.router;
        vec![
            "traefik.enable=true".to_string(),
            format!("traefik.docker.network={}", self.network),
            format!("traefik.http.routers.{r}.rule=Host(`{}`)", self.host),
            format!("traefik.http.routers.{r}.entrypoints=websecure"),
            format!("traefik.http.routers.{r}.tls=true"),
            format!("traefik.http.routers.{r}.tls.certresolver={}", self.tls_resolver),
            format!("traefik.http.services.{r}.loadbalancer.server.port={}", self.port),
        ]
    }
}

/// A subdomain must be one or more DNS labels of `[a-z0-9-]`, not starting
/// or ending with a hyphen.
pub fn is_valid_subdomain(subdomain: &str) -> bool {
    !subdomain.is_empty()
        && subdomain.len() <= 253
        && subdomain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Everything needed for `docker run -d`.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub image: String,
    pub name: Option<String>,
    pub ports: Vec<String>,
    pub volumes: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub command: Option<String>,
    pub route: Option<ProxyRoute>,
}

impl RunSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string()];

        if let Some(name) = &self.name {
            args.extend(["--name".to_string(), name.clone()]);
        }
        for port in &self.ports {
            args.extend(["-p".to_string(), port.clone()]);
        }
        for volume in &self.volumes {
            args.extend(["-v".to_string(), volume.clone()]);
        }
        for (key, value) in &self.env {
            args.extend(["-e".to_string(), format!("{key}={value}")]);
        }
        if let Some(route) = &self.route {
            args.extend(["--network".to_string(), route.network.clone()]);
            for label in route.labels() {
                args.extend(["--label".to_string(), label]);
            }
        }

        args.push(self.image.clone());

        match self.command.as_deref().map(str::trim) {
            Some(command) if !command.is_empty() => {
                args.extend(command.split_whitespace().map(str::to_string));
            }
            _ => args.extend(KEEPALIVE_COMMAND.iter().map(|s| s.to_string())),
        }

        args
    }
}

impl DockerCli {
    /// Start a detached container and return its id.
    pub async fn run_container(&self, spec: &RunSpec) -> Result<String, DockerError> {
        let output = self.run(spec.to_args()).await?;
        Ok(output.stdout.trim().to_string())
    }

    pub async fn stop_container(&self, container: &str) -> Result<(), DockerError> {
        self.run(["stop", container])
            .await
            .map_err(|e| e.for_container(container))?;
        Ok(())
    }

    pub async fn remove_container(&self, container: &str) -> Result<(), DockerError> {
        self.run(["rm", container])
            .await
            .map_err(|e| e.for_container(container))?;
        Ok(())
    }

    /// Whether the container exists and is running.
    pub async fn is_running(&self, container: &str) -> Result<bool, DockerError> {
        let output = self
            .run(["inspect", "-f", "{{.State.Running}}", container])
            .await
            .map_err(|e| e.for_container(container))?;
        Ok(output.stdout.trim() == "true")
    }

    /// Fail with [`DockerError::ContainerNotRunning`] unless the container runs.
    pub async fn ensure_running(&self, container: &str) -> Result<(), DockerError> {
        if self.is_running(container).await? {
            Ok(())
        } else {
            Err(DockerError::ContainerNotRunning {
                container: container.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::scripted;

    fn route() -> ProxyRoute {
        ProxyRoute::new("My-App", "apps.example.com", 8080, "proxy", "letsencrypt")
    }

    #[test]
    fn test_minimal_run_args_keep_container_alive() {
        let spec = RunSpec::new("alpine:3");
        assert_eq!(
            spec.to_args(),
            vec!["run", "-d", "alpine:3", "tail", "-f", "/dev/null"]
        );
    }

    #[test]
    fn test_full_run_args() {
        let mut spec = RunSpec::new("node:20");
        spec.name = Some("web".to_string());
        spec.ports = vec!["3000:3000".to_string()];
        spec.volumes = vec!["/srv/app:/app".to_string()];
        spec.env.insert("NODE_ENV".to_string(), "production".to_string());
        spec.command = Some("node  server.js".to_string());

        assert_eq!(
            spec.to_args(),
            vec![
                "run", "-d", "--name", "web", "-p", "3000:3000", "-v", "/srv/app:/app", "-e",
                "NODE_ENV=production", "node:20", "node", "server.js",
            ]
        );
    }

    #[test]
    fn test_route_adds_network_and_labels() {
        let mut spec = RunSpec::new("nginx");
        spec.route = Some(route());
        let args = spec.to_args();

        let network = args.iter().position(|a| a == "--network").unwrap();
        assert_eq!(args[network + 1], "proxy");
        assert!(args.contains(&"traefik.enable=true".to_string()));
        assert!(args.contains(&"traefik.http.routers.my-app.rule=Host(`my-app.apps.example.com`)".to_string()));
        assert!(args.contains(&"traefik.http.routers.my-app.tls.certresolver=letsencrypt".to_string()));
        assert!(args.contains(&"traefik.http.services.my-app.loadbalancer.server.port=8080".to_string()));
        // Labels come before the image.
        let image = args.iter().position(|a| a == "nginx").unwrap();
        assert!(network < image);
    }

    #[test]
    fn test_route_url() {
        assert_eq!(route().url(), "https://my-app.apps.example.com");
        let dotted = ProxyRoute::new("api", ".example.com", 80, "proxy", "le");
        assert_eq!(dotted.host, "api.example.com");
    }

    #[test]
    fn test_subdomain_validation() {
        assert!(is_valid_subdomain("app"));
        assert!(is_valid_subdomain("my-app.staging"));
        assert!(!is_valid_subdomain(""));
        assert!(!is_valid_subdomain("-app"));
        assert!(!is_valid_subdomain("app-"));
        assert!(!is_valid_subdomain("a..b"));
        assert!(!is_valid_subdomain("app`); evil"));
    }

    #[tokio::test]
    async fn test_run_container_returns_trimmed_id() {
        let cli = scripted("echo 4f2a9c1d");
        let id = cli.run_container(&RunSpec::new("alpine")).await.unwrap();
        assert_eq!(id, "4f2a9c1d");
    }

    #[tokio::test]
    async fn test_is_running() {
        assert!(scripted("echo true").is_running("web").await.unwrap());
        assert!(!scripted("echo false").is_running("web").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_container_is_classified() {
        let cli = scripted("echo 'Error: No such container: ghost' >&2; exit 1");
        let err = cli.is_running("ghost").await.unwrap_err();
        assert!(err.is_not_found());

        let err = cli.stop_container("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_ensure_running_rejects_stopped() {
        let err = scripted("echo false").ensure_running("web").await.unwrap_err();
        assert!(matches!(err, DockerError::ContainerNotRunning { .. }));
    }
}
