use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::models::ValidationErrors;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request body: {0}")]
    Rejection(#[from] JsonRejection),

    #[error("invalid path: {0}")]
    Path(#[from] PathRejection),

    /// Message is returned to the caller as-is; keep it free of internals.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn product_not_found() -> Self {
        AppError::NotFound("Product not found".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Rejection(rejection) => rejection.status(),
            AppError::Path(rejection) => rejection.status(),
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        AppError::Validation(errors)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let reason = status.canonical_reason().unwrap_or("Error");

        let body = match self {
            AppError::Validation(errors) => json!({
                "code": status.as_u16(),
                "status": reason,
                "message": "Validation failed",
                "errors": { "json": errors },
            }),
            AppError::NotFound(message) | AppError::Internal(message) => {
                if status.is_server_error() {
                    error!(%message, "Request failed");
                }
                json!({ "code": status.as_u16(), "status": reason, "message": message })
            }
            AppError::Rejection(rejection) => json!({
                "code": status.as_u16(),
                "status": reason,
                "message": rejection.body_text(),
            }),
            AppError::Path(rejection) => json!({
                "code": status.as_u16(),
                "status": reason,
                "message": rejection.body_text(),
            }),
            AppError::Database(err) => {
                error!(error = %err, "Database error");
                json!({
                    "code": status.as_u16(),
                    "status": reason,
                    "message": "Internal Server Error",
                })
            }
        };

        (status, Json(body)).into_response()
    }
}
