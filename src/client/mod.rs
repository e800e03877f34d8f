//! Client-side realtime voice library.
//!
//! A native client connects to the relay with [`transport::RelayTransport`],
//! routes inbound frames through [`interpreter::EventInterpreter`], and moves
//! audio with the adapters in [`audio`]. Reconnection is governed by
//! [`crate::core::policy::ReconnectPolicy`].

pub mod audio;
pub mod interpreter;
pub mod transport;

pub use audio::{AudioQueue, AudioSink, AudioSource, CapturePump, PlaybackPump};
pub use interpreter::EventInterpreter;
pub use transport::{RelayTransport, TransportConfig};

/// User-visible notification surface.
///
/// Fatal and exhausted-retry conditions produce exactly one notification
/// (title + description); transient retries stay at log level.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, description: &str);
}

/// Default notifier that only logs.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, description: &str) {
        tracing::info!(title, description, "notification");
    }
}
