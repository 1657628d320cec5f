//! The chat session: address derivation, transcript, turn assembly,
//! observable state and the controller that ties them to the channel and
//! the audio pipeline.

pub mod address;
pub mod assembler;
pub mod controller;
pub mod state;
pub mod transcript;

pub use address::channel_address;
pub use assembler::{TurnAssembler, TurnEvent};
pub use controller::{Command, SessionController};
pub use state::{new_shared_state, ChatState, SharedState};
pub use transcript::{ChatMessage, MessageId, Transcript};
