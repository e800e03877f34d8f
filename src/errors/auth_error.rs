//! Authentication errors for the HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors produced while validating request credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was presented
    #[error("Missing authorization")]
    MissingAuthHeader,

    /// The Authorization header was malformed
    #[error("Invalid authorization header")]
    InvalidAuthHeader,

    /// The credential was rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authentication is required but misconfigured
    #[error("Auth configuration error: {0}")]
    ConfigError(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AuthError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
