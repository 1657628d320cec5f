//! The visible chat transcript.

use std::fmt;

use uuid::Uuid;

use crate::protocol::Role;

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// Opaque message identity, assigned at creation and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

/// One transcript entry.
///
/// Role and identity are fixed at creation.  Text only ever grows, and
/// `has_audio` only ever goes from `false` to `true`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    id: MessageId,
    role: Role,
    text: Option<String>,
    has_audio: bool,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            text: Some(text.into()),
            has_audio: false,
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Model,
            text: Some(text.into()),
            has_audio: false,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    fn append(&mut self, fragment: &str) {
        self.text.get_or_insert_with(String::new).push_str(fragment);
    }
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Ordered list of messages for one session.  Only grows.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Append to a model message.  Returns `false` if `id` is unknown or
    /// names a user message.
    pub fn append_text(&mut self, id: MessageId, fragment: &str) -> bool {
        match self.model_mut(id) {
            Some(message) => {
                message.append(fragment);
                true
            }
            None => false,
        }
    }

    /// Flag a model message as carrying audio.
    pub fn mark_audio(&mut self, id: MessageId) -> bool {
        match self.model_mut(id) {
            Some(message) => {
                message.has_audio = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.id == id)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn model_mut(&mut self, id: MessageId) -> Option<&mut ChatMessage> {
        // The open turn is almost always the newest message.
        self.messages
            .iter_mut()
            .rev()
            .find(|m| m.id == id)
            .filter(|m| m.role == Role::Model)
    }
}
