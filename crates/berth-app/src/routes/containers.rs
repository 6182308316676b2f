use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use berth_docker::{is_valid_subdomain, ProxyRoute, RunSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{container_id, operand, required};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Port the proxy forwards to when a subdomain is requested without one.
const DEFAULT_EXPOSE_PORT: u16 = 80;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    image: Option<String>,
    name: Option<String>,
    #[serde(default)]
    ports: Vec<Value>,
    #[serde(default)]
    volumes: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, Value>,
    command: Option<String>,
    subdomain: Option<String>,
    expose_port: Option<u16>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    container_id: String,
    status: &'static str,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRequest {
    container_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    container_id: String,
    status: &'static str,
    message: &'static str,
}

/// Render a JSON scalar the way it should appear on a command line.
fn arg_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `POST /start`
pub async fn start(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> ApiResult<(StatusCode, Json<StartResponse>)> {
    let config = &state.config;
    let image = operand(&req.image, "Container image is required", "Invalid container image")?;

    let route = match non_blank(req.subdomain) {
        Some(subdomain) => {
            let subdomain = subdomain.trim().to_ascii_lowercase();
            if !is_valid_subdomain(&subdomain) {
                return Err(ApiError::bad_request("Invalid subdomain"));
            }
            Some(ProxyRoute::new(
                &subdomain,
                &config.domain_suffix,
                req.expose_port.unwrap_or(DEFAULT_EXPOSE_PORT),
                &config.proxy_network,
                &config.tls_resolver,
            ))
        }
        None => None,
    };

    let mut spec = RunSpec::new(image);
    spec.name = non_blank(req.name);
    spec.ports = req.ports.iter().map(arg_value).collect();
    spec.volumes = if req.volumes.is_empty() {
        config.default_volume.iter().cloned().collect()
    } else {
        req.volumes
    };
    spec.env = req
        .env
        .iter()
        .map(|(key, value)| (key.clone(), arg_value(value)))
        .collect();
    spec.command = non_blank(req.command);
    let url = route.as_ref().map(ProxyRoute::url);
    spec.route = route;

    let container_id = state
        .docker
        .run_container(&spec)
        .await
        .map_err(|e| ApiError::internal("Failed to start container", e.to_string()))?;

    log::info!("started container {container_id} from {image}");
    Ok((
        StatusCode::CREATED,
        Json(StartResponse {
            container_id,
            status: "running",
            message: "Container started successfully",
            url,
        }),
    ))
}

/// `POST /stop`: stop, then remove.
pub async fn stop(
    State(state): State<AppState>,
    Json(req): Json<ContainerRequest>,
) -> ApiResult<Json<ContainerStatus>> {
    let container_id = container_id(&req.container_id)?;
    let fail = |e| ApiError::from_docker("Failed to stop container", container_id, e);

    state.docker.stop_container(container_id).await.map_err(fail)?;
    state.docker.remove_container(container_id).await.map_err(fail)?;

    log::info!("stopped and removed container {container_id}");
    Ok(Json(ContainerStatus {
        container_id: container_id.to_string(),
        status: "stopped",
        message: "Container stopped and removed successfully",
    }))
}

/// `GET /ping?containerId=`
pub async fn ping(
    State(state): State<AppState>,
    Query(req): Query<ContainerRequest>,
) -> ApiResult<Json<ContainerStatus>> {
    ping_container(&state, &req).await
}

/// `POST /ping` with the id in the body.
pub async fn ping_body(
    State(state): State<AppState>,
    Json(req): Json<ContainerRequest>,
) -> ApiResult<Json<ContainerStatus>> {
    ping_container(&state, &req).await
}

async fn ping_container(state: &AppState, req: &ContainerRequest) -> ApiResult<Json<ContainerStatus>> {
    let container_id = container_id(&req.container_id)?;
    let running = state
        .docker
        .is_running(container_id)
        .await
        .map_err(|e| ApiError::from_docker("Failed to ping container", container_id, e))?;

    let (status, message) = if running {
        ("running", "Container is running")
    } else {
        ("not_running", "Container exists but is not running")
    };
    Ok(Json(ContainerStatus {
        container_id: container_id.to_string(),
        status,
        message,
    }))
}
