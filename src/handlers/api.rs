//! REST API handlers.

use axum::{Extension, Json, extract::State};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::auth::Auth;
use crate::state::AppState;

/// Public health check.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "voicebridge",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Active session introspection (protected).
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<Auth>,
) -> Json<Value> {
    tracing::debug!(auth_id = ?auth.id, "Listing active sessions");
    Json(json!({
        "count": state.sessions.len(),
        "sessions": state.sessions.session_ids(),
        "connections": state.ws_connection_count(),
    }))
}
