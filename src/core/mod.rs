//! Core bridge building blocks shared by the relay server and the client
//! library.

pub mod bridge;
pub mod policy;

pub use bridge::{
    BridgeError, BridgeResult, ClientEvent, CloseReason, ConnectionState, ErrorPayload,
    ProviderEvent, SessionUpdateConfig, UpstreamBridge, UpstreamConfig, UpstreamHandle,
};
pub use policy::{ReconnectConfig, ReconnectPolicy};
