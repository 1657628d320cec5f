//! Channel transport: opening one bidirectional text channel to the agent.
//!
//! [`Connector`] is the seam; [`WsConnector`] speaks WebSocket through
//! `tokio-tungstenite`.  A channel is handed back as a boxed text sink and
//! text stream so the manager never sees transport types.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

// ---------------------------------------------------------------------------
// ChannelError
// ---------------------------------------------------------------------------

/// Transport-level failure.  Always followed by the channel closing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    #[error("failed to open channel: {0}")]
    Connect(String),

    #[error("channel transport error: {0}")]
    Transport(String),
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

pub type TextSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// An open channel.  The stream ending means the remote side closed.
pub struct ChannelIo {
    pub sink: TextSink,
    pub stream: TextStream,
}

/// Opens channels to an address.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, address: &str) -> Result<ChannelIo, ChannelError>;
}

// ---------------------------------------------------------------------------
// WsConnector
// ---------------------------------------------------------------------------

/// WebSocket channels (`ws://` and `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, address: &str) -> Result<ChannelIo, ChannelError> {
        let (ws, _response) = tokio_tungstenite::connect_async(address)
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        let (ws_sink, ws_stream) = ws.split();

        let sink = ws_sink
            .with(|text: String| future::ready(Ok::<_, WsError>(Message::Text(text.into()))))
            .sink_map_err(|e| ChannelError::Transport(e.to_string()));

        let stream = ws_stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        log::warn!("transport: dropping non-UTF-8 binary message");
                        None
                    }
                },
                // Ping/pong are answered by tungstenite; close ends the stream.
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::Transport(e.to_string()))),
            })
        });

        Ok(ChannelIo {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

// ---------------------------------------------------------------------------
// MockConnector  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::{MockConnector, ServerEnd};
