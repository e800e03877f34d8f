//! Realtime bridge primitives shared by the relay (server) and the client
//! transport.
//!
//! The bridge speaks the upstream provider's WebSocket protocol: JSON events
//! tagged by a `type` field, with audio carried as base64-encoded PCM 16-bit
//! mono at 24 kHz.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

pub mod events;
pub mod upstream;

pub use events::{
    ClientEvent, ErrorPayload, MaxTokens, ProviderEvent, SessionInfo, SessionUpdateConfig,
    TranscriptionConfig, TurnDetection, error_frame,
};
pub use upstream::{
    CLOSE_INSUFFICIENT_PERMISSION, CLOSE_INVALID_CREDENTIAL, UpstreamBridge, UpstreamConfig,
    UpstreamHandle,
};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Connection to the peer failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// The upstream session has not been configured yet
    #[error("Session not configured yet")]
    SessionNotReady,

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDevice(String),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

// =============================================================================
// Connection State
// =============================================================================

/// Connection state for a realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
    /// Reconnecting after connection loss
    Reconnecting,
    /// Connection failed
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Close Reasons
// =============================================================================

/// Why an upstream bridge stopped, reported through [`ClosedCallback`]
/// exactly once per bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The provider closed the connection normally.
    UpstreamClosed,
    /// The provider rejected the credential or its permissions; not
    /// retryable.
    AuthRejected { code: u16, message: String },
    /// The upstream reconnect budget was spent without re-establishing.
    Exhausted { attempts: u32 },
    /// A newer connection for the same session identifier replaced this one.
    Superseded,
    /// The client side of the relay tore the session down.
    ClientDisconnected,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::UpstreamClosed => write!(f, "upstream closed the connection"),
            CloseReason::AuthRejected { code, message } => {
                write!(f, "upstream rejected credentials (code {code}): {message}")
            }
            CloseReason::Exhausted { attempts } => {
                write!(f, "upstream connection lost after {attempts} reconnection attempts")
            }
            CloseReason::Superseded => {
                write!(f, "session superseded by a newer connection")
            }
            CloseReason::ClientDisconnected => write!(f, "client disconnected"),
        }
    }
}

// =============================================================================
// Callback Types
// =============================================================================

/// Callback for raw provider frames, forwarded verbatim.
pub type FrameCallback =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback invoked exactly once when a bridge reaches a terminal state.
pub type ClosedCallback =
    Arc<dyn Fn(CloseReason) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
