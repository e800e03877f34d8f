use crate::auth::{Auth, match_api_secret_id, validate_jwt};
use crate::errors::auth_error::AuthError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Extract the authentication token from a request.
///
/// Supports two token sources for browser/WebSocket compatibility:
/// 1. Authorization header: `Authorization: Bearer <token>` (preferred)
/// 2. Query parameter: `?token=<token>` (WebSocket clients cannot set
///    request headers)
fn extract_token(request: &Request) -> Result<String, AuthError> {
    if let Some(auth_header) = request.headers().get("authorization") {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            tracing::debug!("Token extracted from Authorization header");
            return Ok(token.to_string());
        }
        return Err(AuthError::InvalidAuthHeader);
    }

    if let Some(query) = request.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "token" {
                tracing::debug!("Token extracted from query parameter");
                return Ok(value.to_string());
            }
        }
    }

    Err(AuthError::MissingAuthHeader)
}

/// Authentication middleware that validates bearer tokens.
///
/// Two validation modes, checked in order:
/// 1. **API secret mode**: constant-time comparison against configured
///    id/secret pairs
/// 2. **JWT mode**: local HS256 validation against the identity service's
///    shared secret
///
/// On success an [`Auth`] context lands in request extensions; failures are
/// rejected with 401 before any WebSocket upgrade happens.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    // Auth disabled: insert an empty context so handlers that read it work.
    if !state.config.auth_required {
        tracing::debug!("Authentication disabled, inserting empty Auth context");
        request.extensions_mut().insert(Auth::empty());
        return Ok(next.run(request).await);
    }

    let request_method = request.method().to_string();
    let request_path = request.uri().path().to_string();

    let token = extract_token(&request)?;

    if state.config.has_api_secret_auth() {
        return match match_api_secret_id(&token, &state.config.auth_api_secrets) {
            Some(secret_id) => {
                tracing::info!(
                    method = %request_method,
                    path = %request_path,
                    auth_id = %secret_id,
                    "API secret authentication successful"
                );
                request.extensions_mut().insert(Auth::new(secret_id));
                Ok(next.run(request).await)
            }
            None => {
                tracing::warn!(
                    method = %request_method,
                    path = %request_path,
                    "API secret authentication failed: token mismatch"
                );
                Err(AuthError::Unauthorized("Invalid API secret".to_string()))
            }
        };
    }

    if let Some(jwt_secret) = state.config.auth_jwt_secret.as_deref() {
        return match validate_jwt(&token, jwt_secret) {
            Ok(auth) => {
                tracing::info!(
                    method = %request_method,
                    path = %request_path,
                    auth_id = ?auth.id,
                    "JWT authentication successful"
                );
                request.extensions_mut().insert(auth);
                Ok(next.run(request).await)
            }
            Err(e) => {
                tracing::warn!(
                    method = %request_method,
                    path = %request_path,
                    error = %e,
                    "JWT authentication failed"
                );
                Err(e)
            }
        };
    }

    Err(AuthError::ConfigError(
        "Authentication required but no auth method configured".to_string(),
    ))
}
