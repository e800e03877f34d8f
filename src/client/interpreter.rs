//! Inbound event interpreter.
//!
//! Classifies each relay frame and drives the client-side effects: audio
//! deltas go to the playback queue, transcript deltas accumulate, errors
//! surface through the notifier. One corrupt frame never terminates the
//! session.

use std::sync::Arc;

use base64::prelude::*;
use bytes::Bytes;

use crate::core::bridge::ProviderEvent;

use super::Notifier;
use super::audio::AudioQueue;

/// Stateful interpreter for inbound provider events.
///
/// The assistant-speaking flag moves idle → speaking on the first audio
/// delta of a response and back to idle when the audio is done.
pub struct EventInterpreter {
    queue: Arc<AudioQueue>,
    notifier: Arc<dyn Notifier>,
    transcript: String,
    speaking: bool,
    listening: bool,
}

impl EventInterpreter {
    pub fn new(queue: Arc<AudioQueue>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            queue,
            notifier,
            transcript: String::new(),
            speaking: false,
            listening: false,
        }
    }

    /// Decode and dispatch one raw frame. Undecodable frames are logged and
    /// dropped.
    pub fn handle_frame(&mut self, raw: &str) {
        match serde_json::from_str::<ProviderEvent>(raw) {
            Ok(event) => self.handle_event(event),
            Err(e) => {
                tracing::warn!("Dropping undecodable frame: {}", e);
            }
        }
    }

    /// Dispatch one classified event.
    pub fn handle_event(&mut self, event: ProviderEvent) {
        match event {
            ProviderEvent::SessionCreated { session } => {
                tracing::info!(session_id = %session.id, "Realtime session created");
            }
            ProviderEvent::SessionUpdated { .. } => {
                tracing::debug!("Realtime session updated");
            }
            ProviderEvent::SpeechStarted { .. } => {
                self.listening = true;
            }
            ProviderEvent::SpeechStopped { .. } => {
                self.listening = false;
            }
            ProviderEvent::AudioDelta { delta } => match BASE64_STANDARD.decode(&delta) {
                Ok(pcm) => {
                    self.queue.push(Bytes::from(pcm));
                    self.speaking = true;
                }
                Err(e) => {
                    // One corrupt frame must not end the session, and it must
                    // not flip the speaking flag either.
                    tracing::warn!("Dropping malformed audio delta: {}", e);
                }
            },
            ProviderEvent::AudioDone { .. } => {
                self.speaking = false;
            }
            ProviderEvent::AudioTranscriptDelta { delta } => {
                self.transcript.push_str(&delta);
            }
            ProviderEvent::AudioTranscriptDone { .. } => {
                tracing::debug!(transcript = %self.transcript, "Assistant transcript complete");
            }
            ProviderEvent::Error { error } => {
                let message = error
                    .message
                    .unwrap_or_else(|| "The voice session hit an unexpected error".to_string());
                tracing::error!("Realtime error: {}", message);
                self.notifier.notify("Voice session error", &message);
            }
            ProviderEvent::Unknown => {
                tracing::debug!("Ignoring unhandled event type");
            }
        }
    }

    /// Whether the assistant is currently speaking.
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Whether voice activity detection currently hears the user.
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Running assistant transcript.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn clear_transcript(&mut self) {
        self.transcript.clear();
    }
}
