//! HTTP control plane.

mod containers;
mod exec;
mod files;
mod tunnel;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::terminal::ws;

/// Plain-text reply for `GET /health` and non-upgrade `GET /`.
pub const BANNER: &str = "berth worker is running";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws::root))
        .route("/ws", get(ws::terminal_ws))
        .route("/health", get(health))
        .route("/start", post(containers::start))
        .route("/stop", post(containers::stop))
        .route("/ping", get(containers::ping).post(containers::ping_body))
        .route("/exec", post(exec::exec))
        .route("/exec/stream", post(exec::exec_stream))
        .route("/exec-stream", post(exec::exec_stream))
        .route("/files", post(files::write_files).get(files::list_files))
        .route("/tunnel", post(tunnel::open_tunnel))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    BANNER
}

/// A present, non-blank request field, or a 400 with `message`.
pub(crate) fn required<'a>(value: &'a Option<String>, message: &str) -> ApiResult<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::bad_request(message)),
    }
}

/// A required field that is passed to the runtime as a positional operand,
/// so it must not look like an option.
pub(crate) fn operand<'a>(
    value: &'a Option<String>,
    missing: &str,
    invalid: &str,
) -> ApiResult<&'a str> {
    let value = required(value, missing)?;
    if value.starts_with('-') {
        return Err(ApiError::bad_request(invalid));
    }
    Ok(value)
}

pub(crate) fn container_id(value: &Option<String>) -> ApiResult<&str> {
    operand(value, "Container ID is required", "Invalid container ID")
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use berth_docker::DockerCli;
    use http_body_util::BodyExt;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use crate::config::{test_config, Config};
    use crate::state::AppState;

    /// Router whose runtime is a shell script; `$1..` are the runtime args.
    pub fn app(script: &str) -> Router {
        app_with(script, test_config())
    }

    pub fn app_with(script: &str, config: Config) -> Router {
        let mut state = AppState::new(config, CancellationToken::new());
        state.docker = DockerCli::new("/bin/sh").with_args(["-c", script, "docker"]);
        super::router(state)
    }

    pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    pub async fn call_text(app: Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    pub async fn call(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let (status, text) = call_text(app, request).await;
        let json = serde_json::from_str(&text)
            .unwrap_or_else(|e| panic!("response is not JSON ({e}): {text}"));
        (status, json)
    }
}
