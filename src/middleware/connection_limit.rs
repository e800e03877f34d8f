//! Connection limit middleware for WebSocket connections.
//!
//! Enforces a global cap and a per-IP cap on concurrent WebSocket sessions.
//! Non-upgrade requests pass through untouched.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Extension carrying the client IP through to the handler so it can release
/// the connection slot when the socket ends.
#[derive(Clone, Debug)]
pub struct ClientIp(pub IpAddr);

/// Middleware that enforces WebSocket connection limits.
///
/// Returns 503 when the global limit is reached and 429 when the per-IP
/// limit is reached; otherwise acquires a slot and injects [`ClientIp`] so
/// the handler can release it on teardown.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    let client_ip = addr.ip();

    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(ip = %client_ip, "Rejecting connection: global limit reached");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(ip = %client_ip, "Rejecting connection: per-IP limit reached");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn per_ip_limit_is_enforced_and_released() {
        let config = ServerConfig {
            max_websocket_connections: Some(10),
            max_connections_per_ip: 2,
            ..ServerConfig::default()
        };
        let state = AppState::new(config);
        let ip: IpAddr = Ipv4Addr::new(192, 168, 1, 100).into();

        assert!(state.try_acquire_connection(ip).is_ok());
        assert!(state.try_acquire_connection(ip).is_ok());
        assert_eq!(
            state.try_acquire_connection(ip),
            Err(ConnectionLimitError::PerIpLimitReached)
        );

        state.release_connection(ip);
        assert!(state.try_acquire_connection(ip).is_ok());
        assert_eq!(state.ws_connection_count(), 2);
        assert_eq!(state.ip_connection_count(&ip), 2);
    }

    #[tokio::test]
    async fn global_limit_is_enforced() {
        let config = ServerConfig {
            max_websocket_connections: Some(3),
            max_connections_per_ip: 10,
            ..ServerConfig::default()
        };
        let state = AppState::new(config);

        let ips: Vec<IpAddr> = (1..=4)
            .map(|i| Ipv4Addr::new(10, 0, 0, i).into())
            .collect();
        for ip in &ips[0..3] {
            assert!(state.try_acquire_connection(*ip).is_ok());
        }
        assert_eq!(
            state.try_acquire_connection(ips[3]),
            Err(ConnectionLimitError::GlobalLimitReached)
        );

        state.release_connection(ips[0]);
        assert!(state.try_acquire_connection(ips[3]).is_ok());
    }
}
