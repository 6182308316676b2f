use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::cli::DockerCli;
use crate::error::DockerError;

/// Decodes base64 from stdin into the path given as `$1`.
const WRITE_SCRIPT: &str = r#"base64 -d > "$1""#;

/// `<workdir>/<name>`, without doubling the separator.
pub fn join_path(workdir: &str, name: &str) -> String {
    let base = workdir.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    format!("{base}/{name}")
}

/// Directory part of `path`, or `None` when it has no parent to create.
pub fn parent_dir(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(i) => Some(&path[..i]),
    }
}

impl DockerCli {
    /// `mkdir -p` inside the container.
    pub async fn make_dir(&self, container: &str, path: &str) -> Result<(), DockerError> {
        self.run(["exec", container, "mkdir", "-p", path])
            .await
            .map_err(|e| e.for_container(container))?;
        Ok(())
    }

    /// Write `content` to `path` inside the container.
    ///
    /// The content travels base64-encoded over stdin and is decoded inside the
    /// container, so arbitrary bytes survive and nothing is shell-interpolated.
    pub async fn write_file(
        &self,
        container: &str,
        path: &str,
        content: &[u8],
    ) -> Result<(), DockerError> {
        let encoded = STANDARD.encode(content);
        self.run_with_input(
            ["exec", "-i", container, "/bin/sh", "-c", WRITE_SCRIPT, "sh", path],
            Some(encoded.as_bytes()),
        )
        .await
        .map_err(|e| e.for_container(container))?;
        Ok(())
    }

    /// Entries of a directory inside the container, one per line of `ls -1`.
    pub async fn list_dir(&self, container: &str, path: &str) -> Result<Vec<String>, DockerError> {
        let output = self
            .run(["exec", container, "ls", "-1", path])
            .await
            .map_err(|e| e.for_container(container))?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::scripted;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/app", "src/main.rs"), "/app/src/main.rs");
        assert_eq!(join_path("/app/", "/index.js"), "/app/index.js");
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/app/src/main.rs"), Some("/app/src"));
        assert_eq!(parent_dir("/main.rs"), None);
        assert_eq!(parent_dir("main.rs"), None);
    }

    #[tokio::test]
    async fn test_write_file_sends_base64_and_path() {
        // $8 is the target path; the payload arrives base64-encoded on stdin.
        let cli = scripted(r#"[ "$8" = "/app/a.txt" ] || exit 2; [ "$(cat)" = "aGVsbG8K" ] || exit 3"#);
        let result = cli.write_file("web", "/app/a.txt", b"hello\n").await;
        assert!(result.is_ok(), "write failed: {result:?}");

        let err = cli.write_file("web", "/app/b.txt", b"hello\n").await.unwrap_err();
        assert!(matches!(err, DockerError::ExecutionFailed { code: Some(2), .. }));
    }

    #[tokio::test]
    async fn test_list_dir_splits_lines() {
        let cli = scripted(r#"printf 'a.txt\nsrc\n\n'"#);
        let entries = cli.list_dir("web", "/app").await.unwrap();
        assert_eq!(entries, vec!["a.txt", "src"]);
    }

    #[tokio::test]
    async fn test_list_empty_dir() {
        let cli = scripted("true");
        assert!(cli.list_dir("web", "/empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_make_dir_missing_container() {
        let cli = scripted("echo 'No such container: ghost' >&2; exit 1");
        let err = cli.make_dir("ghost", "/app").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
