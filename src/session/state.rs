//! Observable chat state and its shared handle.
//!
//! [`ChatState`] is the single source of truth for a presentation layer:
//! connection status, typing indicator, audio mode, the transcript and the
//! last user-visible error.  Every mutation bumps [`ChatState::revision`],
//! so a renderer can poll cheaply and only redraw when something changed.
//!
//! [`SharedState`] is `Arc<Mutex<ChatState>>`.  The session controller is
//! the only writer.

use std::sync::{Arc, Mutex};

use super::assembler::TurnEvent;
use super::transcript::{ChatMessage, Transcript};
use crate::connection::ConnectionState;

// ---------------------------------------------------------------------------
// ChatState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ChatState {
    connection: ConnectionState,
    typing: bool,
    audio_mode: bool,
    transcript: Transcript,
    last_error: Option<String>,
    revision: u64,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn typing(&self) -> bool {
        self.typing
    }

    pub fn audio_mode(&self) -> bool {
        self.audio_mode
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.transcript.messages()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Incremented on every change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // -----------------------------------------------------------------------
    // Mutation (session controller only)
    // -----------------------------------------------------------------------

    pub(crate) fn set_connection(&mut self, connection: ConnectionState) {
        if self.connection != connection {
            self.connection = connection;
            self.touch();
        }
    }

    pub(crate) fn set_typing(&mut self, typing: bool) {
        if self.typing != typing {
            self.typing = typing;
            self.touch();
        }
    }

    pub(crate) fn set_audio_mode(&mut self, audio_mode: bool) {
        if self.audio_mode != audio_mode {
            self.audio_mode = audio_mode;
            self.touch();
        }
    }

    pub(crate) fn set_error(&mut self, error: Option<String>) {
        if self.last_error != error {
            self.last_error = error;
            self.touch();
        }
    }

    pub(crate) fn push_message(&mut self, message: ChatMessage) {
        self.transcript.push(message);
        self.touch();
    }

    /// Apply one assembler event.  `Playback` is routed to the audio
    /// pipeline by the controller and ignored here.
    pub(crate) fn apply(&mut self, event: TurnEvent) {
        match event {
            TurnEvent::SetTyping(typing) => self.set_typing(typing),
            TurnEvent::Created(message) => self.push_message(message),
            TurnEvent::AppendText { id, text } => {
                if self.transcript.append_text(id, &text) {
                    self.touch();
                } else {
                    log::warn!("session: append to unknown message {id}");
                }
            }
            TurnEvent::MarkAudio { id } => {
                if self.transcript.mark_audio(id) {
                    self.touch();
                }
            }
            TurnEvent::Playback(_) => {}
        }
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

// ---------------------------------------------------------------------------
// SharedState
// ---------------------------------------------------------------------------

/// Thread-safe handle to [`ChatState`].
///
/// Lock for a short critical section; never hold the lock across `.await`.
pub type SharedState = Arc<Mutex<ChatState>>;

pub fn new_shared_state() -> SharedState {
    Arc::new(Mutex::new(ChatState::new()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
