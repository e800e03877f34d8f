//! Application errors for the HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced as HTTP responses before a WebSocket upgrade.
#[derive(Debug, Error)]
pub enum AppError {
    /// The request was malformed
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A required upstream credential is not configured. Reported once as a
    /// structured `{error, debug}` body; retrying cannot fix it.
    #[error("{error}")]
    MissingCredential {
        /// User-facing error summary
        error: String,
        /// Operator-facing hint
        debug: String,
    },

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": message })),
            )
                .into_response(),
            AppError::MissingCredential { error, debug } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error, "debug": debug })),
            )
                .into_response(),
            AppError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message })),
            )
                .into_response(),
        }
    }
}
