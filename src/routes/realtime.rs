//! Realtime WebSocket route configuration.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::realtime::realtime_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the realtime WebSocket router.
///
/// # Endpoint
///
/// `GET /realtime?session=<id>&token=<bearer>` - WebSocket upgrade for one
/// relay session. The token rides in the query string because WebSocket
/// clients cannot set request headers; the auth middleware validates it
/// before the upgrade.
pub fn create_realtime_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/realtime", get(realtime_handler))
        .layer(TraceLayer::new_for_http())
}
