//! Realtime WebSocket relay handlers.
//!
//! # Protocol
//!
//! `GET /realtime?session=<id>&token=<bearer>` upgrades to a WebSocket.
//!
//! ## Client → Relay
//!
//! - JSON frames tagged by `type`, forwarded verbatim to the upstream
//!   provider (`input_audio_buffer.append` is held back until the session
//!   has been configured)
//! - Binary frames: raw PCM 16-bit mono 24 kHz audio, wrapped into base64
//!   `input_audio_buffer.append` events
//!
//! ## Relay → Client
//!
//! - Upstream provider frames, verbatim and in arrival order
//! - Relay-originated `{"type":"error","error":{...}}` frames for runtime
//!   failures

mod handler;
pub mod messages;

pub use handler::realtime_handler;
