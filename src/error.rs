use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::mail::MailError;
use crate::storage::StorageError;

/// Field name → validation messages, rendered as the 400 body.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {0:?}")]
    Validation(FieldErrors),

    /// Login rejections. Always 400 with the message as `detail`.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Third-party identity token rejected by the provider checks.
    #[error("OAuth verification failed: {0}")]
    OAuth(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Single-field validation error.
    pub fn field(name: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(name.to_string(), vec![message.into()]);
        AppError::Validation(errors)
    }

    /// Report a UNIQUE violation as a field error; pass anything else through.
    pub fn unique(err: rusqlite::Error, name: &str, message: &str) -> Self {
        if crate::db::is_unique_violation(&err) {
            AppError::field(name, message)
        } else {
            AppError::Database(err)
        }
    }
}

fn internal() -> (StatusCode, serde_json::Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "detail": "Internal server error" }),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, json!({ "detail": "Not found." })),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!({ "detail": msg })),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, json!({ "detail": msg })),
            AppError::BadRequest(msg) | AppError::AuthFailed(msg) | AppError::Conflict(msg) => {
                (StatusCode::BAD_REQUEST, json!({ "detail": msg }))
            }
            AppError::Validation(errors) => (StatusCode::BAD_REQUEST, json!(errors)),
            AppError::OAuth(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "detail": "Invalid token", "error": msg }),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                internal()
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                internal()
            }
            AppError::Storage(StorageError::NotFound(key)) => {
                tracing::warn!("Missing object: {}", key);
                (StatusCode::NOT_FOUND, json!({ "detail": "Not found." }))
            }
            AppError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                internal()
            }
            AppError::Mail(e) => {
                tracing::error!("Mail error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "detail": "Message could not be delivered." }),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                internal()
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                internal()
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("blocking task failed: {}", e))
    }
}

pub type AppResult<T> = Result<T, AppError>;
