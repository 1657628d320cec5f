//! Wire protocol spoken over the streaming channel.
//!
//! Every message is one JSON object:
//!
//! ```text
//! client → agent   {"mime_type":"text/plain","data":"hello","role":"user"}
//!                  {"mime_type":"audio/pcm","data":"<base64 16-bit PCM @ 16 kHz>"}
//!
//! agent → client   {"mime_type":"text/plain","data":"Hi","role":"model"}
//!                  {"mime_type":"audio/pcm","data":"<base64 16-bit PCM @ 24 kHz>"}
//!                  {"turn_complete":true}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::pcm;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_AUDIO: &str = "audio/pcm";

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Author of a piece of conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

// ---------------------------------------------------------------------------
// MalformedFrame
// ---------------------------------------------------------------------------

/// An inbound payload that violates the protocol.
#[derive(Debug, Error)]
pub enum MalformedFrame {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("audio payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

// ---------------------------------------------------------------------------
// OutboundFrame
// ---------------------------------------------------------------------------

/// A frame sent from this client to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundFrame {
    pub mime_type: &'static str,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl OutboundFrame {
    /// Typed user text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            mime_type: MIME_TEXT,
            data: text.into(),
            role: Some(Role::User),
        }
    }

    /// One block of captured microphone audio, already 16-bit PCM.
    pub fn audio(pcm_bytes: &[u8]) -> Self {
        Self {
            mime_type: MIME_AUDIO,
            data: pcm::to_wire_text(pcm_bytes),
            role: None,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type == MIME_AUDIO
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// InboundFrame
// ---------------------------------------------------------------------------

/// What an inbound frame carries, as far as turn assembly is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// End-of-turn marker; any payload is ignored.
    TurnComplete,
    Text,
    Audio,
    /// Unknown mime type.  Skipped.
    Other,
}

/// A frame received from the agent.
///
/// All fields are optional on the wire: a turn-complete marker usually
/// carries nothing else.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
}

impl InboundFrame {
    /// Parse one channel message.
    pub fn parse(text: &str) -> Result<Self, MalformedFrame> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn text(role: Role, data: impl Into<String>) -> Self {
        Self {
            mime_type: Some(MIME_TEXT.into()),
            data: Some(data.into()),
            role: Some(role),
            turn_complete: None,
        }
    }

    pub fn audio(pcm_bytes: &[u8]) -> Self {
        Self {
            mime_type: Some(MIME_AUDIO.into()),
            data: Some(pcm::to_wire_text(pcm_bytes)),
            role: Some(Role::Model),
            turn_complete: None,
        }
    }

    pub fn turn_complete() -> Self {
        Self {
            turn_complete: Some(true),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> FrameKind {
        if self.turn_complete.unwrap_or(false) {
            return FrameKind::TurnComplete;
        }
        match self.mime_type.as_deref() {
            Some(MIME_TEXT) => FrameKind::Text,
            Some(MIME_AUDIO) => FrameKind::Audio,
            _ => FrameKind::Other,
        }
    }

    /// Frames without a role are attributed to the agent.
    pub fn role(&self) -> Role {
        self.role.unwrap_or(Role::Model)
    }

    pub fn data(&self) -> &str {
        self.data.as_deref().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_text_shape() {
        let json = OutboundFrame::text("hello").to_json().expect("serialize");
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(
            value,
            serde_json::json!({"mime_type": "text/plain", "data": "hello", "role": "user"})
        );
    }

    #[test]
    fn outbound_audio_has_no_role() {
        let frame = OutboundFrame::audio(&[0x01, 0x00]);
        assert!(frame.is_audio());

        let value: serde_json::Value =
            serde_json::from_str(&frame.to_json().expect("serialize")).expect("json");
        assert_eq!(
            value,
            serde_json::json!({"mime_type": "audio/pcm", "data": "AQA="})
        );
    }

    #[test]
    fn inbound_model_text() {
        let frame =
            InboundFrame::parse(r#"{"mime_type":"text/plain","data":"Hi","role":"model"}"#)
                .expect("parse");
        assert_eq!(frame.kind(), FrameKind::Text);
        assert_eq!(frame.role(), Role::Model);
        assert_eq!(frame.data(), "Hi");
    }

    #[test]
    fn inbound_missing_role_defaults_to_model() {
        let frame = InboundFrame::parse(r#"{"mime_type":"text/plain","data":"x"}"#).expect("parse");
        assert_eq!(frame.role(), Role::Model);
    }

    #[test]
    fn inbound_turn_complete_wins_over_payload() {
        let frame = InboundFrame::parse(
            r#"{"mime_type":"text/plain","data":"ignored","turn_complete":true,"interrupted":false}"#,
        )
        .expect("parse");
        assert_eq!(frame.kind(), FrameKind::TurnComplete);
    }

    #[test]
    fn inbound_turn_complete_false_is_content() {
        let frame =
            InboundFrame::parse(r#"{"mime_type":"audio/pcm","data":"","turn_complete":false}"#)
                .expect("parse");
        assert_eq!(frame.kind(), FrameKind::Audio);
    }

    #[test]
    fn inbound_unknown_mime_is_other() {
        let frame = InboundFrame::parse(r#"{"mime_type":"image/png","data":""}"#).expect("parse");
        assert_eq!(frame.kind(), FrameKind::Other);
    }

    #[test]
    fn inbound_non_json_is_malformed() {
        assert!(matches!(
            InboundFrame::parse("not json at all"),
            Err(MalformedFrame::Json(_))
        ));
    }
}
