use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Operation invalid: {0}")]
    OperationInvalid(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid chunk: {0}")]
    ChunkInvalid(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, code) = match &self {
            AppError::Database(e) => {
                tracing::error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                    "database_error",
                )
            }
            AppError::Storage(msg) => {
                tracing::error!("storage error: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    msg.clone(),
                    "storage_unavailable",
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), "not_found"),
            AppError::InvalidStateTransition(msg) => (
                StatusCode::CONFLICT,
                msg.clone(),
                "invalid_state_transition",
            ),
            AppError::OperationInvalid(msg) => {
                (StatusCode::CONFLICT, msg.clone(), "operation_invalid")
            }
            AppError::AccessDenied(msg) => {
                tracing::warn!("access denied: {}", msg);
                (StatusCode::FORBIDDEN, msg.clone(), "access_denied")
            }
            AppError::ChunkInvalid(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone(), "chunk_invalid")
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "bad_request"),
            AppError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    msg.clone(),
                    "internal_error",
                )
            }
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}
