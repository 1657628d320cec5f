//! Turn assembler: inbound frames → transcript mutations.
//!
//! The agent streams one turn as many small frames and ends it with a
//! `turn_complete` marker:
//!
//! ```text
//! text "Hi"     ─▶ SetTyping(true), Created(model "Hi")      current = m1
//! audio <pcm>   ─▶ SetTyping(true), MarkAudio(m1), Playback
//! text " there" ─▶ SetTyping(true), AppendText(m1, " there")
//! turn_complete ─▶ SetTyping(false)                          current = ∅
//! ```
//!
//! The assembler does no I/O.  It returns [`TurnEvent`]s and the session
//! controller applies them to the shared state and the audio pipeline.

use crate::audio::pcm;
use crate::protocol::{FrameKind, InboundFrame, MalformedFrame, Role};

use super::transcript::{ChatMessage, MessageId};

/// One mutation produced by a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    SetTyping(bool),
    /// A new message to append to the transcript.
    Created(ChatMessage),
    AppendText { id: MessageId, text: String },
    MarkAudio { id: MessageId },
    /// Agent PCM16 for the player.
    Playback(Vec<u8>),
}

/// Tracks the model message currently being streamed.
#[derive(Debug, Default)]
pub struct TurnAssembler {
    current: Option<MessageId>,
    current_has_audio: bool,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The model message of the open turn, if any.
    pub fn current_turn(&self) -> Option<MessageId> {
        self.current
    }

    /// Parse and assemble one raw channel message.
    pub fn feed(&mut self, raw: &str) -> Result<Vec<TurnEvent>, MalformedFrame> {
        let frame = InboundFrame::parse(raw)?;
        self.assemble(&frame)
    }

    /// Assemble one frame.
    ///
    /// # Errors
    ///
    /// [`MalformedFrame::Base64`] when an audio payload does not decode.
    /// The assembler state is unchanged in that case.
    pub fn assemble(&mut self, frame: &InboundFrame) -> Result<Vec<TurnEvent>, MalformedFrame> {
        match frame.kind() {
            FrameKind::TurnComplete => {
                if let Some(id) = self.current.take() {
                    log::debug!("assembler: turn {id} complete");
                }
                self.current_has_audio = false;
                Ok(vec![TurnEvent::SetTyping(false)])
            }

            FrameKind::Audio => {
                let bytes = pcm::from_wire_text(frame.data())?;
                let mut events = vec![TurnEvent::SetTyping(true)];
                match self.current {
                    Some(id) if !self.current_has_audio => {
                        self.current_has_audio = true;
                        events.push(TurnEvent::MarkAudio { id });
                    }
                    Some(_) => {}
                    None => log::trace!("assembler: audio outside a turn"),
                }
                events.push(TurnEvent::Playback(bytes));
                Ok(events)
            }

            FrameKind::Text => {
                let mut events = vec![TurnEvent::SetTyping(true)];
                let text = frame.data();
                match (frame.role(), self.current) {
                    (Role::User, _) => {
                        events.push(TurnEvent::Created(ChatMessage::user(text)));
                    }
                    (Role::Model, Some(id)) => {
                        events.push(TurnEvent::AppendText {
                            id,
                            text: text.to_string(),
                        });
                    }
                    (Role::Model, None) => {
                        let message = ChatMessage::model(text);
                        log::debug!("assembler: turn {} opened", message.id());
                        self.current = Some(message.id());
                        self.current_has_audio = false;
                        events.push(TurnEvent::Created(message));
                    }
                }
                Ok(events)
            }

            FrameKind::Other => {
                log::debug!(
                    "assembler: skipping frame with mime type {:?}",
                    frame.mime_type
                );
                Ok(Vec::new())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
