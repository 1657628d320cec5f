//! Connection manager: owns the one streaming channel to the agent.
//!
//! # State machine
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──Opened──▶ Connected
//!      ▲                                                 │
//!      └──────────────── Errored / Closed ───────────────┘
//!                              │ enabled
//!                              ▼
//!                  sleep(retry_delay) ─▶ RetryDue(id)
//!                              │ still enabled, still channel `id`
//!                              ▼
//!                          connect()
//!
//! set_enabled(false): any state ──▶ Disconnected, pending retries go stale
//! ```
//!
//! Every channel instance gets a fresh [`ChannelId`].  Its driver task and
//! its retry timer tag the events they emit with that id, and the manager
//! ignores anything tagged with an id that is no longer current.  A
//! reconnect or a disable therefore cancels all older work without
//! touching it.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::transport::{ChannelError, ChannelIo, Connector};
use crate::protocol::OutboundFrame;

/// Identity of one channel instance.  Never reused within a manager.
pub type ChannelId = u64;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// A short label for a status line.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Something that happened to one channel instance.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened,
    Frame(String),
    /// Always followed by `Closed`.
    Errored(ChannelError),
    Closed,
    /// The reconnect delay scheduled after this channel closed has elapsed.
    RetryDue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    pub channel: ChannelId,
    pub kind: ChannelEvent,
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

struct Channel {
    id: ChannelId,
    /// Dropping this ends the driver task, which closes the transport.
    outbound: mpsc::UnboundedSender<String>,
}

/// Opens, replaces and retries the streaming channel.
///
/// The manager never blocks: channel I/O runs in a spawned driver task and
/// comes back as [`ConnectionEvent`]s on the queue given to
/// [`new`](Self::new).  The owner feeds each event back through
/// [`handle`](Self::handle), strictly in arrival order.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    retry_delay: Duration,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    address: String,
    enabled: bool,
    state: ConnectionState,
    next_id: ChannelId,
    current: Option<Channel>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        retry_delay: Duration,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            connector,
            retry_delay,
            events,
            address: String::new(),
            enabled: false,
            state: ConnectionState::Disconnected,
            next_id: 0,
            current: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Point the manager at a new address.  An enabled manager reconnects
    /// immediately when the address actually changed.
    pub fn set_address(&mut self, address: impl Into<String>) {
        let address = address.into();
        if address == self.address {
            return;
        }
        log::debug!("connection: address → {address:?}");
        self.address = address;
        if self.enabled {
            self.connect();
        }
    }

    /// Open a new channel instance, replacing any current one.
    ///
    /// A no-op when the address is empty.
    pub fn connect(&mut self) {
        if self.address.is_empty() {
            log::debug!("connection: no address, not connecting");
            return;
        }

        self.next_id += 1;
        let id = self.next_id;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        // Replacing `current` drops the old outbound sender, which ends the
        // old driver.  Its trailing events carry a stale id.
        self.current = Some(Channel {
            id,
            outbound: outbound_tx,
        });
        self.state = ConnectionState::Connecting;

        log::info!("connection: opening channel #{id} to {}", self.address);
        tokio::spawn(drive_channel(
            Arc::clone(&self.connector),
            self.address.clone(),
            id,
            outbound_rx,
            self.events.clone(),
        ));
    }

    /// Gate whether a channel may be held or retried at all.
    ///
    /// Disabling closes the current channel and turns every pending retry
    /// stale.  Enabling a disabled manager connects immediately.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;

        if enabled {
            log::info!("connection: enabled");
            self.connect();
        } else {
            log::info!("connection: disabled");
            self.current = None;
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Send one frame.  Delivered only while connected; otherwise the frame
    /// is dropped and `false` returned.
    pub fn send(&self, frame: &OutboundFrame) -> bool {
        let channel = match (&self.current, self.state) {
            (Some(channel), ConnectionState::Connected) => channel,
            _ => {
                log::trace!("connection: not connected, dropping {} frame", frame.mime_type);
                return false;
            }
        };

        match frame.to_json() {
            Ok(json) => channel.outbound.send(json).is_ok(),
            Err(e) => {
                log::warn!("connection: could not serialize frame: {e}");
                false
            }
        }
    }

    /// Apply one event from the queue.
    ///
    /// Returns the payload when the event is a frame received on the
    /// current channel.
    pub fn handle(&mut self, event: ConnectionEvent) -> Option<String> {
        let ConnectionEvent { channel: id, kind } = event;
        let is_current = self.current.as_ref().is_some_and(|c| c.id == id);

        if !is_current {
            log::trace!("connection: ignoring stale {kind:?} from channel #{id}");
            return None;
        }

        match kind {
            ChannelEvent::Opened => {
                log::info!("connection: channel #{id} open");
                self.state = ConnectionState::Connected;
                None
            }
            ChannelEvent::Frame(text) => Some(text),
            ChannelEvent::Errored(e) => {
                log::warn!("connection: channel #{id} error: {e}");
                self.state = ConnectionState::Disconnected;
                None
            }
            ChannelEvent::Closed => {
                log::info!("connection: channel #{id} closed");
                self.state = ConnectionState::Disconnected;
                if self.enabled {
                    self.schedule_retry(id);
                }
                None
            }
            ChannelEvent::RetryDue => {
                if self.enabled && self.state == ConnectionState::Disconnected {
                    log::info!("connection: retrying after channel #{id}");
                    self.connect();
                }
                None
            }
        }
    }

    fn schedule_retry(&self, id: ChannelId) {
        log::debug!(
            "connection: reconnecting in {:.1}s",
            self.retry_delay.as_secs_f32()
        );
        let delay = self.retry_delay;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ConnectionEvent {
                channel: id,
                kind: ChannelEvent::RetryDue,
            });
        });
    }
}

// ---------------------------------------------------------------------------
// Channel driver
// ---------------------------------------------------------------------------

/// Open one channel and pump it until either side goes away.
///
/// Emits `Opened`, then any number of `Frame`s, then optionally `Errored`,
/// and always finishes with `Closed`.
async fn drive_channel(
    connector: Arc<dyn Connector>,
    address: String,
    id: ChannelId,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let emit = |kind: ChannelEvent| {
        let _ = events.send(ConnectionEvent { channel: id, kind });
    };

    let ChannelIo {
        mut sink,
        mut stream,
    } = match connector.open(&address).await {
        Ok(io) => io,
        Err(e) => {
            emit(ChannelEvent::Errored(e));
            emit(ChannelEvent::Closed);
            return;
        }
    };
    emit(ChannelEvent::Opened);

    let failure = loop {
        tokio::select! {
            text = outbound.recv() => match text {
                Some(text) => {
                    if let Err(e) = sink.send(text).await {
                        break Some(e);
                    }
                }
                None => {
                    // Owner let go of this channel.
                    if let Err(e) = sink.close().await {
                        log::debug!("connection: channel #{id} close: {e}");
                    }
                    break None;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(text)) => emit(ChannelEvent::Frame(text)),
                Some(Err(e)) => break Some(e),
                None => break None,
            },
        }
    };

    if let Some(e) = failure {
        emit(ChannelEvent::Errored(e));
    }
    emit(ChannelEvent::Closed);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::transport::MockConnector;

    const RETRY: Duration = Duration::from_secs(5);
    const ADDRESS: &str = "ws://localhost:8000/ws/abc?is_audio=false";

    fn manager(connector: &MockConnector) -> (ConnectionManager, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(Arc::new(connector.clone()), RETRY, tx);
        (manager, rx)
    }

    /// Wait for the next event and apply it.
    async fn pump(
        manager: &mut ConnectionManager,
        rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
    ) -> (ConnectionEvent, Option<String>) {
        let event = rx.recv().await.expect("event queue open");
        let frame = manager.handle(event.clone());
        (event, frame)
    }

    async fn connected(connector: &MockConnector) -> (ConnectionManager, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (mut manager, mut rx) = self::manager(connector);
        manager.set_address(ADDRESS);
        manager.set_enabled(true);
        let (event, _) = pump(&mut manager, &mut rx).await;
        assert_eq!(event.kind, ChannelEvent::Opened);
        assert_eq!(manager.state(), ConnectionState::Connected);
        (manager, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn enable_opens_channel_at_address() {
        let connector = MockConnector::default();
        let (manager, _rx) = connected(&connector).await;

        assert!(manager.is_enabled());
        assert_eq!(connector.opened(), 1);
        assert_eq!(connector.with_server(0, |s| s.address.clone()), ADDRESS);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_address_is_a_noop() {
        let connector = MockConnector::default();
        let (mut manager, mut rx) = manager(&connector);

        manager.set_enabled(true);
        manager.connect();
        tokio::time::sleep(RETRY * 2).await;

        assert_eq!(connector.attempts(), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn frames_flow_both_ways() {
        let connector = MockConnector::default();
        let (mut manager, mut rx) = connected(&connector).await;

        assert!(manager.send(&OutboundFrame::text("hello")));
        connector.with_server(0, |s| s.send(r#"{"turn_complete":true}"#));

        let (_, frame) = pump(&mut manager, &mut rx).await;
        assert_eq!(frame.as_deref(), Some(r#"{"turn_complete":true}"#));

        let sent = connector.with_server(0, |s| s.received());
        assert_eq!(
            sent,
            vec![r#"{"mime_type":"text/plain","data":"hello","role":"user"}"#.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_not_connected_is_dropped() {
        let connector = MockConnector::default();
        let (mut manager, _rx) = manager(&connector);

        assert!(!manager.send(&OutboundFrame::text("lost")));

        manager.set_address(ADDRESS);
        manager.set_enabled(true);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(!manager.send(&OutboundFrame::text("still lost")));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_retries_exactly_once_after_delay() {
        let connector = MockConnector::default();
        let (mut manager, mut rx) = connected(&connector).await;

        connector.with_server(0, |s| s.close());
        let (event, _) = pump(&mut manager, &mut rx).await;
        assert_eq!(event.kind, ChannelEvent::Closed);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::sleep(RETRY - Duration::from_millis(1)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(connector.attempts(), 1);

        let (event, _) = pump(&mut manager, &mut rx).await;
        assert_eq!(event.kind, ChannelEvent::RetryDue);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        let (event, _) = pump(&mut manager, &mut rx).await;
        assert_eq!(event.kind, ChannelEvent::Opened);
        assert_eq!(connector.attempts(), 2);
        assert!(manager.state().is_connected());

        tokio::time::sleep(RETRY * 3).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disable_before_delay_suppresses_retry() {
        let connector = MockConnector::default();
        let (mut manager, mut rx) = connected(&connector).await;

        connector.with_server(0, |s| s.close());
        pump(&mut manager, &mut rx).await;

        tokio::time::sleep(RETRY / 2).await;
        manager.set_enabled(false);

        tokio::time::sleep(RETRY * 2).await;
        while let Ok(event) = rx.try_recv() {
            manager.handle(event);
        }

        assert_eq!(connector.attempts(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn error_then_close_schedules_a_single_retry() {
        let connector = MockConnector::default();
        let (mut manager, mut rx) = connected(&connector).await;

        connector.with_server(0, |s| s.fail("reset by peer"));

        let (event, _) = pump(&mut manager, &mut rx).await;
        assert!(matches!(event.kind, ChannelEvent::Errored(ChannelError::Transport(_))));
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let (event, _) = pump(&mut manager, &mut rx).await;
        assert_eq!(event.kind, ChannelEvent::Closed);

        let (event, _) = pump(&mut manager, &mut rx).await;
        assert_eq!(event.kind, ChannelEvent::RetryDue);
        pump(&mut manager, &mut rx).await;

        assert_eq!(connector.attempts(), 2);
        assert!(manager.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connect_keeps_retrying_while_enabled() {
        let connector = MockConnector::default();
        connector.set_refusing(true);
        let (mut manager, mut rx) = manager(&connector);
        manager.set_address(ADDRESS);
        manager.set_enabled(true);

        for attempt in 1..=3 {
            let (event, _) = pump(&mut manager, &mut rx).await;
            assert!(matches!(event.kind, ChannelEvent::Errored(ChannelError::Connect(_))));
            let (event, _) = pump(&mut manager, &mut rx).await;
            assert_eq!(event.kind, ChannelEvent::Closed);
            assert_eq!(connector.attempts(), attempt);
            let (event, _) = pump(&mut manager, &mut rx).await;
            assert_eq!(event.kind, ChannelEvent::RetryDue);
        }
        pump(&mut manager, &mut rx).await;
        assert_eq!(connector.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn address_change_replaces_channel_and_ignores_old_events() {
        let connector = MockConnector::default();
        let (mut manager, mut rx) = connected(&connector).await;

        manager.set_address("ws://localhost:8000/ws/abc?is_audio=true");
        assert_eq!(manager.state(), ConnectionState::Connecting);

        // The old channel's Closed and the new channel's Opened, in either order.
        for _ in 0..2 {
            pump(&mut manager, &mut rx).await;
        }
        assert!(manager.state().is_connected());
        assert_eq!(connector.opened(), 2);

        // No retry for the replaced channel.
        tokio::time::sleep(RETRY * 2).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_frames_are_not_delivered() {
        let connector = MockConnector::default();
        let (mut manager, _rx) = connected(&connector).await;

        let stale = ConnectionEvent {
            channel: 0,
            kind: ChannelEvent::Frame("old".into()),
        };
        assert_eq!(manager.handle(stale), None);

        let stale_retry = ConnectionEvent {
            channel: 0,
            kind: ChannelEvent::RetryDue,
        };
        manager.handle(stale_retry);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn address_change_while_disabled_does_not_connect() {
        let connector = MockConnector::default();
        let (mut manager, _rx) = manager(&connector);

        manager.set_address(ADDRESS);
        tokio::time::sleep(RETRY).await;

        assert_eq!(manager.address(), ADDRESS);
        assert_eq!(connector.attempts(), 0);
    }

    #[test]
    fn state_labels() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connecting.label(), "Connecting");
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
    }
}
