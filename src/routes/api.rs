use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the API router with protected routes.
///
/// Authentication middleware is applied in main.rs once state is available.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", get(api::list_sessions))
        .layer(TraceLayer::new_for_http())
}
