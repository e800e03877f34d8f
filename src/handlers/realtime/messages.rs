//! Client-leg frame validation.
//!
//! The relay is a passthrough: client text frames go upstream verbatim, so
//! validation stops at "well-formed JSON with a `type` tag and a sane size".
//! Anything deeper would couple the relay to the provider's event
//! vocabulary.

use serde::Deserialize;

/// Maximum accepted client text frame (1 MB; audio appends dominate).
pub const MAX_TEXT_FRAME_SIZE: usize = 1024 * 1024;

/// Event type used for client audio appends; refused until the upstream
/// session has been configured.
pub const AUDIO_APPEND_TYPE: &str = "input_audio_buffer.append";

/// Error type for frame validation failures.
#[derive(Debug, Clone)]
pub enum FrameValidationError {
    /// Frame exceeds the maximum allowed size
    FrameTooLarge { size: usize, max: usize },
    /// Frame is not valid JSON
    InvalidJson { message: String },
    /// Frame has no `type` tag
    MissingType,
}

impl std::fmt::Display for FrameValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FrameTooLarge { size, max } => {
                write!(f, "Frame too large: {} bytes (max: {} bytes)", size, max)
            }
            Self::InvalidJson { message } => write!(f, "Invalid message format: {}", message),
            Self::MissingType => write!(f, "Message has no `type` field"),
        }
    }
}

impl std::error::Error for FrameValidationError {}

#[derive(Debug, Deserialize)]
struct FrameTag {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Validate one client text frame, returning its `type` tag.
pub fn validate_client_frame(text: &str) -> Result<String, FrameValidationError> {
    let size = text.len();
    if size > MAX_TEXT_FRAME_SIZE {
        return Err(FrameValidationError::FrameTooLarge {
            size,
            max: MAX_TEXT_FRAME_SIZE,
        });
    }
    let tag: FrameTag =
        serde_json::from_str(text).map_err(|e| FrameValidationError::InvalidJson {
            message: e.to_string(),
        })?;
    tag.kind.ok_or(FrameValidationError::MissingType)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_tagged_frames() {
        let kind = validate_client_frame(r#"{"type":"input_audio_buffer.commit"}"#).unwrap();
        assert_eq!(kind, "input_audio_buffer.commit");

        let kind =
            validate_client_frame(r#"{"type":"input_audio_buffer.append","audio":"AAEC"}"#)
                .unwrap();
        assert_eq!(kind, AUDIO_APPEND_TYPE);
    }

    #[test]
    fn rejects_untyped_and_malformed_frames() {
        assert!(matches!(
            validate_client_frame(r#"{"audio":"AAEC"}"#),
            Err(FrameValidationError::MissingType)
        ));
        assert!(matches!(
            validate_client_frame("pcm bytes, not json"),
            Err(FrameValidationError::InvalidJson { .. })
        ));
    }

    #[test]
    fn rejects_oversized_frames() {
        let huge = format!(r#"{{"type":"x","pad":"{}"}}"#, "a".repeat(MAX_TEXT_FRAME_SIZE));
        assert!(matches!(
            validate_client_frame(&huge),
            Err(FrameValidationError::FrameTooLarge { .. })
        ));
    }
}
