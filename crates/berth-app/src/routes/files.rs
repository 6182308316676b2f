use axum::extract::{Query, State};
use axum::Json;
use berth_docker::{join_path, parent_dir};
use serde::{Deserialize, Serialize};

use super::{container_id, required};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct FileUpload {
    name: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteFilesRequest {
    container_id: Option<String>,
    workdir: Option<String>,
    files: Option<Vec<FileUpload>>,
}

#[derive(Debug, Serialize)]
pub struct FileResult {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteFilesResponse {
    container_id: String,
    workdir: String,
    results: Vec<FileResult>,
    success: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesQuery {
    container_id: Option<String>,
    workdir: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesResponse {
    container_id: String,
    workdir: String,
    files: Vec<String>,
    success: bool,
}

/// Fail with 400 unless the container is running.
async fn require_running(state: &AppState, container_id: &str, message: &str) -> ApiResult<()> {
    let running = state
        .docker
        .is_running(container_id)
        .await
        .map_err(|e| ApiError::execution_failed(message, container_id, e))?;
    if running {
        Ok(())
    } else {
        Err(ApiError::bad_request("Container is not running"))
    }
}

/// `POST /files`: write each file under `workdir`, creating directories.
///
/// Files are written independently; the response lists a result per file.
pub async fn write_files(
    State(state): State<AppState>,
    Json(req): Json<WriteFilesRequest>,
) -> ApiResult<Json<WriteFilesResponse>> {
    const FAILED: &str = "Failed to create files in container";

    let container_id = container_id(&req.container_id)?;
    let files = match req.files.as_deref() {
        Some(files) if !files.is_empty() => files,
        _ => return Err(ApiError::bad_request("Files array is required")),
    };
    let workdir = required(&req.workdir, "Workdir is required")?;

    require_running(&state, container_id, FAILED).await?;
    state
        .docker
        .make_dir(container_id, workdir)
        .await
        .map_err(|e| ApiError::execution_failed(FAILED, container_id, e))?;

    let mut results = Vec::with_capacity(files.len());
    for file in files {
        let (name, content) = match (file.name.as_deref(), file.content.as_deref()) {
            (Some(name), Some(content)) if !name.is_empty() && !content.is_empty() => (name, content),
            _ => {
                results.push(FileResult {
                    name: file
                        .name
                        .clone()
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| "unnamed".to_string()),
                    path: None,
                    success: false,
                    error: Some("File name and content are required".to_string()),
                });
                continue;
            }
        };

        let path = join_path(workdir, name);
        let written = async {
            if let Some(dir) = parent_dir(&path) {
                state.docker.make_dir(container_id, dir).await?;
            }
            state
                .docker
                .write_file(container_id, &path, content.as_bytes())
                .await
        }
        .await;

        match written {
            Ok(()) => {
                log::debug!("wrote {path} in {container_id}");
                results.push(FileResult {
                    name: name.to_string(),
                    path: Some(path),
                    success: true,
                    error: None,
                });
            }
            Err(e) => {
                log::warn!("failed to write {path} in {container_id}: {e}");
                results.push(FileResult {
                    name: name.to_string(),
                    path: None,
                    success: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let success = results.iter().any(|r| r.success);
    Ok(Json(WriteFilesResponse {
        container_id: container_id.to_string(),
        workdir: workdir.to_string(),
        results,
        success,
    }))
}

/// `GET /files?containerId=&workdir=`
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListFilesQuery>,
) -> ApiResult<Json<ListFilesResponse>> {
    const FAILED: &str = "Failed to list files in container";

    let container_id = container_id(&query.container_id)?;
    let workdir = required(&query.workdir, "Workdir is required")?;

    require_running(&state, container_id, FAILED).await?;
    let files = state
        .docker
        .list_dir(container_id, workdir)
        .await
        .map_err(|e| ApiError::execution_failed(FAILED, container_id, e))?;

    Ok(Json(ListFilesResponse {
        container_id: container_id.to_string(),
        workdir: workdir.to_string(),
        files,
        success: true,
    }))
}
