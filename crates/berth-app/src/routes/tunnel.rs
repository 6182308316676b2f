use axum::extract::State;
use axum::Json;
use berth_docker::TunnelError;
use serde::{Deserialize, Serialize};

use super::container_id;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const NOT_RUNNING: &str = "Container not found or not running";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRequest {
    container_id: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Serialize)]
pub struct TunnelResponse {
    url: String,
}

impl From<TunnelError> for ApiError {
    fn from(err: TunnelError) -> Self {
        match err {
            TunnelError::Timeout => ApiError::GatewayTimeout(err.to_string()),
            TunnelError::Closed { code } => ApiError::internal(
                err.to_string(),
                format!(
                    "tunnel client exited with code {}",
                    code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
                ),
            ),
            TunnelError::Spawn(source) => ApiError::internal("Failed to start tunnel", source.to_string()),
        }
    }
}

/// `POST /tunnel`: expose a container port through a quick tunnel.
pub async fn open_tunnel(
    State(state): State<AppState>,
    Json(req): Json<TunnelRequest>,
) -> ApiResult<Json<TunnelResponse>> {
    let container_id = container_id(&req.container_id)?;
    let port = match req.port {
        Some(port) if port > 0 => port,
        _ => return Err(ApiError::bad_request("Port is required")),
    };

    match state.docker.is_running(container_id).await {
        Ok(true) => {}
        Ok(false) => return Err(ApiError::NotFound(NOT_RUNNING.to_string())),
        Err(e) if e.is_not_found() => return Err(ApiError::NotFound(NOT_RUNNING.to_string())),
        Err(e) => return Err(ApiError::internal("Failed to start tunnel", e.to_string())),
    }

    let url = state
        .docker
        .open_tunnel(container_id, port, state.config.tunnel_timeout())
        .await?;

    log::info!("tunnel for {container_id}:{port} at {url}");
    Ok(Json(TunnelResponse { url }))
}
