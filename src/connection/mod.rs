//! The streaming channel to the agent.
//!
//! [`transport`] opens one channel; [`manager`] decides when a channel should
//! exist, replaces it on reconnect and schedules retries.

pub mod manager;
pub mod transport;

pub use manager::{ChannelEvent, ChannelId, ConnectionEvent, ConnectionManager, ConnectionState};
pub use transport::{ChannelError, ChannelIo, Connector, WsConnector};

#[cfg(test)]
pub use transport::{MockConnector, ServerEnd};
