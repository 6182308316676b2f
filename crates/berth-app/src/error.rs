//! HTTP error responses for the control plane.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use berth_docker::DockerError;
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Container not found")]
    ContainerNotFound { container_id: String },

    #[error("{0}")]
    NotFound(String),

    /// A runtime invocation failed. Captured output is passed back to the
    /// caller when there is any.
    #[error("{message}")]
    Internal {
        message: String,
        details: Option<String>,
        stdout: Option<String>,
        stderr: Option<String>,
        success: Option<bool>,
    },

    #[error("{0}")]
    GatewayTimeout(String),
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    success: Option<bool>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>, details: impl Into<String>) -> Self {
        ApiError::Internal {
            message: message.into(),
            details: Some(details.into()),
            stdout: None,
            stderr: None,
            success: None,
        }
    }

    /// Map a runtime failure: unknown containers become 404, everything else
    /// a 500 carrying `message` and the runtime's explanation.
    pub fn from_docker(message: &str, container_id: &str, err: DockerError) -> Self {
        if err.is_not_found() {
            return ApiError::ContainerNotFound {
                container_id: container_id.to_string(),
            };
        }
        ApiError::internal(message, err.to_string())
    }

    /// Like [`ApiError::from_docker`] but echoes the command's output, for
    /// endpoints whose callers want to see what the command printed.
    pub fn execution_failed(message: &str, container_id: &str, err: DockerError) -> Self {
        if err.is_not_found() {
            return ApiError::from_docker(message, container_id, err);
        }
        let (stdout, stderr) = err
            .output()
            .map(|(out, err)| (out.to_string(), err.to_string()))
            .unwrap_or_default();
        ApiError::Internal {
            message: message.to_string(),
            details: Some(err.to_string()),
            stdout: Some(stdout),
            stderr: Some(stderr),
            success: Some(false),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ContainerNotFound { .. } | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.to_string();

        let body = match self {
            ApiError::ContainerNotFound { container_id } => ErrorBody {
                error,
                container_id: Some(container_id),
                details: None,
                stdout: None,
                stderr: None,
                success: None,
            },
            ApiError::Internal {
                details,
                stdout,
                stderr,
                success,
                ..
            } => {
                log::error!("{error}: {}", details.as_deref().unwrap_or("-"));
                ErrorBody {
                    error,
                    container_id: None,
                    details,
                    stdout,
                    stderr,
                    success,
                }
            }
            _ => ErrorBody {
                error,
                container_id: None,
                details: None,
                stdout: None,
                stderr: None,
                success: None,
            },
        };

        if status.is_client_error() {
            log::debug!("{status}: {}", body.error);
        }

        (status, Json(body)).into_response()
    }
}
