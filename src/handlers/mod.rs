//! HTTP and WebSocket request handlers.
//!
//! - `api` - health check and session introspection
//! - `realtime` - realtime voice relay WebSocket

pub mod api;
pub mod realtime;

pub use realtime::realtime_handler;
