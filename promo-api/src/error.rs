use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use promo_core::{CoreError, ValidationErrors};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    ValidationError(ValidationErrors),
    #[error("{0}")]
    NotFoundError(String),
    #[error("{0}")]
    ConflictError(String),
    #[error("Dependency unavailable: {0}")]
    UnavailableError(String),
    #[error("Internal error: {0}")]
    InternalServerError(String),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(id) => AppError::NotFoundError(format!("Offer {} not found", id)),
            CoreError::ValidationFailed(errors) => AppError::ValidationError(errors),
            CoreError::Conflict(id) => {
                AppError::ConflictError(format!("Offer {} was modified concurrently, retry the request", id))
            }
            CoreError::SchedulingFailed(msg) => AppError::UnavailableError(msg),
            CoreError::Storage(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::ValidationError(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "Validation failed", "fields": errors }),
            ),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::UnavailableError(msg) => {
                tracing::error!("Dependency unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": "Service Unavailable" }))
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal Server Error" }))
            }
        };

        (status, Json(body)).into_response()
    }
}
