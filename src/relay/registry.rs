//! Session registry: the relay's only shared mutable resource.
//!
//! Maps session identifiers to their upstream bridge. The map is owned by
//! the service instance and injected where needed; there is no ambient
//! global. It is mutated in exactly two places: registration, which evicts
//! and closes any prior bridge for the same identifier, and teardown, which
//! removes the entry — so at most one upstream connection exists per
//! session identifier at any time.

use dashmap::DashMap;
use uuid::Uuid;

use crate::core::bridge::{BridgeError, BridgeResult, CloseReason, UpstreamBridge, UpstreamHandle};

struct RegisteredSession {
    connection_id: Uuid,
    bridge: UpstreamBridge,
}

/// Concurrent session-id → upstream-bridge map.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, RegisteredSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bridge for a session identifier, superseding (closing) any
    /// prior bridge registered under the same identifier.
    ///
    /// Returns the connection id the caller must present at teardown.
    pub fn register(&self, session_id: &str, bridge: UpstreamBridge) -> Uuid {
        let connection_id = bridge.connection_id();
        let prior = self.sessions.insert(
            session_id.to_string(),
            RegisteredSession {
                connection_id,
                bridge,
            },
        );
        if let Some(prior) = prior {
            tracing::info!(
                session_id,
                prior_connection = %prior.connection_id,
                "Superseding prior upstream connection for session"
            );
            prior.bridge.close(CloseReason::Superseded);
        }
        connection_id
    }

    /// Fetch the sending surface for a session, if one is registered.
    ///
    /// The handle is cloned out so no map guard is held across await points.
    pub fn handle(&self, session_id: &str) -> BridgeResult<UpstreamHandle> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.bridge.handle())
            .ok_or(BridgeError::NotConnected)
    }

    /// Tear down a session, but only if it is still owned by the given
    /// connection. A superseded handler therefore cannot deregister its
    /// successor.
    ///
    /// Returns true when an entry was removed.
    pub fn remove(&self, session_id: &str, connection_id: Uuid) -> bool {
        let removed = self
            .sessions
            .remove_if(session_id, |_, entry| entry.connection_id == connection_id);
        match removed {
            Some((_, entry)) => {
                entry.bridge.close(CloseReason::ClientDisconnected);
                tracing::debug!(session_id, "Session deregistered");
                true
            }
            None => false,
        }
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Active session identifiers, for the introspection endpoint.
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Whether the given connection still owns its session entry.
    pub fn owns(&self, session_id: &str, connection_id: Uuid) -> bool {
        self.sessions
            .get(session_id)
            .map(|entry| entry.connection_id == connection_id)
            .unwrap_or(false)
    }
}

// Eviction and teardown behavior is exercised end-to-end (with a live mock
// provider) in tests/relay_integration.rs; only the map bookkeeping that
// needs no socket is unit-tested here.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_session_reports_not_connected() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.handle("nope"),
            Err(BridgeError::NotConnected)
        ));
        assert!(registry.is_empty());
        assert!(!registry.remove("nope", Uuid::new_v4()));
    }
}
