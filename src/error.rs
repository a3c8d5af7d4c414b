use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Missing, expired or rejected credentials. Only an explicit re-authorization
    /// fixes this, so callers retry on a capped cadence.
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Transient failure of a calendar-list or event-list call.
    #[error("Remote fetch error: {0}")]
    RemoteFetch(String),

    /// Target variable missing or the write failed.
    #[error("Variable write error: {0}")]
    VariableWrite(String),

    /// Unexpected fault inside a trigger worker's evaluation.
    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid or missing rule/device fields, rejected at configuration time.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("External service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    pub fn is_authorization(&self) -> bool {
        matches!(self, AppError::Authorization(_))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                msg.clone(),
            ),
            AppError::Authorization(msg) => {
                tracing::warn!("Authorization error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "ACCOUNT_OFFLINE", msg.clone())
            }
            AppError::RemoteFetch(msg) => {
                tracing::error!("Remote fetch error: {}", msg);
                (StatusCode::BAD_GATEWAY, "REMOTE_FETCH_FAILED", msg.clone())
            }
            AppError::VariableWrite(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "VARIABLE_WRITE_FAILED", msg.clone())
            }
            AppError::Worker(msg) => {
                tracing::error!("Worker error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "WORKER_ERROR",
                    "A trigger worker failed".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Request(e) => {
                tracing::error!("HTTP request error: {:?}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "EXTERNAL_REQUEST_FAILED",
                    "Failed to communicate with external service".to_string(),
                )
            }
            AppError::Serialization(e) => {
                tracing::error!("Serialization error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SERIALIZATION_ERROR",
                    "Stored data could not be decoded".to_string(),
                )
            }
            AppError::Config(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "Server configuration error".to_string(),
                )
            }
            AppError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                msg.clone(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
