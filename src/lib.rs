//! Real-time voice chat client.
//!
//! Keeps one streaming channel open to a conversational agent, sends typed
//! text and microphone audio over it, and assembles the agent's streamed
//! replies into a transcript while playing its voice.
//!
//! ```text
//! presentation ─▶ session::SessionController ─┬─▶ connection::ConnectionManager ◀─▶ agent
//!                        │                     └─▶ audio::AudioPipeline ◀─▶ devices
//!                        ▼
//!                 session::SharedState ─▶ presentation
//! ```

pub mod audio;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod session;
