//! Shared application state.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::config::ServerConfig;
use crate::relay::SessionRegistry;

/// Reason a new WebSocket connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    /// The global connection cap is reached
    GlobalLimitReached,
    /// The per-IP connection cap is reached
    PerIpLimitReached,
}

/// Application state shared across handlers.
///
/// The session registry lives here so the relay's session map is owned by
/// the service instance and injected, never ambient.
pub struct AppState {
    pub config: ServerConfig,
    pub sessions: SessionRegistry,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, usize>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: SessionRegistry::new(),
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Try to take a connection slot for the given client IP.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        if let Some(max) = self.config.max_websocket_connections {
            if self.ws_connections.load(Ordering::SeqCst) >= max {
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        }

        {
            let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
            if *per_ip >= self.config.max_connections_per_ip {
                return Err(ConnectionLimitError::PerIpLimitReached);
            }
            *per_ip += 1;
        }

        self.ws_connections.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Release a connection slot acquired with `try_acquire_connection`.
    pub fn release_connection(&self, ip: IpAddr) {
        let remove = match self.ip_connections.get_mut(&ip) {
            Some(mut entry) => {
                if *entry <= 1 {
                    true
                } else {
                    *entry -= 1;
                    false
                }
            }
            None => false,
        };
        if remove {
            self.ip_connections.remove(&ip);
        }

        let _ = self
            .ws_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            });
    }

    /// Current number of open WebSocket connections.
    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }

    /// Current number of open connections for one IP.
    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.ip_connections.get(ip).map(|e| *e).unwrap_or(0)
    }
}
