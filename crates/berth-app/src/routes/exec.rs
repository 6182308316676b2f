use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use berth_docker::{ExecSpec, StreamEvent};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::{container_id, required};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecRequest {
    container_id: Option<String>,
    command: Option<String>,
    workdir: Option<String>,
}

impl ExecRequest {
    fn to_spec(&self) -> ApiResult<ExecSpec> {
        let container_id = container_id(&self.container_id)?;
        let command = required(&self.command, "Command is required")?;
        Ok(ExecSpec::new(container_id, command).workdir(self.workdir.clone()))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResponse {
    container_id: String,
    stdout: String,
    stderr: String,
    success: bool,
}

/// `POST /exec`: run to completion, return trimmed output.
pub async fn exec(
    State(state): State<AppState>,
    Json(req): Json<ExecRequest>,
) -> ApiResult<Json<ExecResponse>> {
    let spec = req.to_spec()?;
    log::debug!("exec in {}: {}", spec.container, spec.command);

    let output = state.docker.exec(&spec).await.map_err(|e| {
        ApiError::execution_failed("Failed to execute command in container", &spec.container, e)
    })?;

    Ok(Json(ExecResponse {
        container_id: spec.container,
        stdout: output.stdout.trim().to_string(),
        stderr: output.stderr.trim().to_string(),
        success: true,
    }))
}

/// Body chunk for one stream event.
fn stream_chunk(event: StreamEvent) -> Bytes {
    match event {
        StreamEvent::Output(bytes) => Bytes::from(bytes),
        StreamEvent::Exited(code) => {
            let code = code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
            Bytes::from(format!("\nProcess exited with code {code}"))
        }
        StreamEvent::Failed(message) => Bytes::from(format!("\nError: {message}")),
    }
}

/// `POST /exec/stream`: plain-text body carrying stdout and stderr as they
/// are produced, followed by an exit trailer.
///
/// The process is killed if the client disconnects first.
pub async fn exec_stream(
    State(state): State<AppState>,
    Json(req): Json<ExecRequest>,
) -> ApiResult<Response> {
    let spec = req.to_spec()?;
    log::debug!("streaming exec in {}: {}", spec.container, spec.command);

    let events = state.docker.exec_stream(&spec);
    let body = ReceiverStream::new(events).map(|event| Ok::<_, Infallible>(stream_chunk(event)));

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        Body::from_stream(body),
    )
        .into_response())
}
