//! Session controller, the externally-facing side of the client.
//!
//! [`SessionController`] owns the connection manager, the turn assembler
//! and the audio pipeline, and is the only writer of [`SharedState`].
//!
//! # Event loop
//!
//! ```text
//! Command (presentation) ──┐
//! ConnectionEvent ─────────┼─▶ run() ── one at a time ──▶ SharedState
//! OutboundFrame (mic) ─────┘
//!
//! Frame ─▶ TurnAssembler ─▶ TurnEvent ─┬─▶ ChatState
//!                                      └─▶ AudioPipeline::playback
//! ```
//!
//! The controller runs as a single local task; nothing it owns is touched
//! concurrently.  Device callbacks only reach it through the uplink queue.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::address::channel_address;
use super::assembler::{TurnAssembler, TurnEvent};
use super::state::{ChatState, SharedState};
use super::transcript::ChatMessage;
use crate::audio::{AudioBackend, AudioPipeline, DeviceError};
use crate::config::AppConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState, Connector};
use crate::protocol::OutboundFrame;

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Operations the presentation layer can ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SendText(String),
    StartVoice,
    StopVoice,
    SetChannelEnabled(bool),
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

pub struct SessionController {
    state: SharedState,
    session_id: String,
    host: String,
    secure: bool,
    /// Channel enabled by [`open`](Self::open).
    connect_on_open: bool,
    audio_mode: bool,
    connection: ConnectionManager,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    assembler: TurnAssembler,
    audio: AudioPipeline,
    uplink_tx: mpsc::UnboundedSender<OutboundFrame>,
    uplink_rx: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl SessionController {
    /// Build a controller.  Nothing is opened until [`open`](Self::open)
    /// or [`run`](Self::run).
    pub fn new(
        config: &AppConfig,
        state: SharedState,
        connector: Arc<dyn Connector>,
        backend: Box<dyn AudioBackend>,
    ) -> Self {
        let session_id = config
            .session
            .session_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let (events_tx, events) = mpsc::unbounded_channel();
        let (uplink_tx, uplink_rx) = mpsc::unbounded_channel();
        let audio_mode = config.session.audio_by_default;

        let mut controller = Self {
            state,
            session_id,
            host: config.server.host.clone(),
            secure: config.server.secure,
            connect_on_open: config.session.audio_by_default || config.session.connect_on_start,
            audio_mode,
            connection: ConnectionManager::new(
                connector,
                config.server.reconnect_delay(),
                events_tx,
            ),
            events,
            assembler: TurnAssembler::new(),
            audio: AudioPipeline::new(backend, &config.audio),
            uplink_tx,
            uplink_rx,
        };

        controller.refresh_address();
        controller.with_state(|st| st.set_audio_mode(audio_mode));
        log::info!("session: id {}", controller.session_id);
        controller
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    /// Apply the startup options: enable the channel when configured to.
    pub fn open(&mut self) {
        if self.connect_on_open {
            self.set_channel_enabled(true);
        }
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Run until `commands` is closed, then stop voice and disable the
    /// channel.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.open();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.events.recv() => self.handle_connection_event(event),
                Some(frame) = self.uplink_rx.recv() => self.handle_uplink(frame),
            }
        }

        log::info!("session: command channel closed, controller shutting down");
        self.shutdown();
    }

    /// Wait for and process one connection event or uplink frame.
    pub async fn step(&mut self) {
        tokio::select! {
            Some(event) = self.events.recv() => self.handle_connection_event(event),
            Some(frame) = self.uplink_rx.recv() => self.handle_uplink(frame),
            else => {}
        }
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendText(text) => self.send_text(&text),
            Command::StartVoice => {
                // Failure is already recorded in the shared state.
                let _ = self.start_voice();
            }
            Command::StopVoice => self.stop_voice(),
            Command::SetChannelEnabled(enabled) => self.set_channel_enabled(enabled),
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Echo `text` into the transcript and send it to the agent.
    ///
    /// The frame is dropped if the channel is not connected; the local echo
    /// and typing indicator appear regardless.  Any text is accepted; input
    /// filtering belongs to the front-end.
    pub fn send_text(&mut self, text: &str) {
        self.with_state(|st| {
            st.push_message(ChatMessage::user(text));
            st.set_typing(true);
        });

        if !self.connection.send(&OutboundFrame::text(text)) {
            log::warn!("session: not connected, text was not delivered");
        }
    }

    /// Acquire the audio devices, switch to the audio address and enable
    /// the channel.
    ///
    /// The address changes before the channel is enabled, so a disabled
    /// channel opens once, straight into audio mode, and a connected one is
    /// replaced once.
    ///
    /// # Errors
    ///
    /// Returns the [`DeviceError`] when the devices cannot be acquired.
    /// Audio mode stays off, no device is held, and the error is shown in
    /// [`ChatState::last_error`].  The channel is still enabled, in text
    /// mode.
    pub fn start_voice(&mut self) -> Result<(), DeviceError> {
        if let Err(e) = self.audio.start(self.uplink_tx.clone()) {
            log::error!("session: voice unavailable: {e}");
            self.connection.set_enabled(true);
            self.with_state(|st| st.set_error(Some(e.to_string())));
            self.sync_connection();
            return Err(e);
        }

        self.audio_mode = true;
        self.refresh_address();
        self.connection.set_enabled(true);

        self.with_state(|st| {
            st.set_audio_mode(true);
            st.set_error(None);
        });
        self.sync_connection();
        log::info!("session: voice on");
        Ok(())
    }

    /// Release the audio devices, leave audio mode and disable the channel.
    pub fn stop_voice(&mut self) {
        self.audio.stop();

        // Disable before the address changes so the new address does not
        // trigger a reconnect.
        self.connection.set_enabled(false);
        self.audio_mode = false;
        self.refresh_address();

        self.with_state(|st| st.set_audio_mode(false));
        self.sync_connection();
        log::info!("session: voice off");
    }

    /// Allow or forbid holding a channel, independent of voice.
    pub fn set_channel_enabled(&mut self, enabled: bool) {
        self.connection.set_enabled(enabled);
        self.sync_connection();
    }

    pub fn handle_connection_event(&mut self, event: ConnectionEvent) {
        if let Some(raw) = self.connection.handle(event) {
            self.handle_frame(&raw);
        }
        self.sync_connection();
    }

    fn handle_frame(&mut self, raw: &str) {
        let events = match self.assembler.feed(raw) {
            Ok(events) => events,
            Err(e) => {
                log::warn!("session: skipping malformed frame: {e}");
                return;
            }
        };

        let mut st = self.lock_state();
        for event in events {
            match event {
                TurnEvent::Playback(bytes) => self.audio.playback(&bytes),
                other => st.apply(other),
            }
        }
    }

    fn handle_uplink(&mut self, frame: OutboundFrame) {
        self.connection.send(&frame);
    }

    fn shutdown(&mut self) {
        self.audio.stop();
        self.connection.set_enabled(false);
        self.sync_connection();
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn refresh_address(&mut self) {
        let address = channel_address(&self.host, self.secure, &self.session_id, self.audio_mode);
        self.connection.set_address(address);
    }

    /// Mirror the manager's state.  A channel that is down never leaves a
    /// typing indicator behind.
    fn sync_connection(&mut self) {
        let connection = self.connection.state();
        self.with_state(|st| {
            st.set_connection(connection);
            if connection == ConnectionState::Disconnected {
                st.set_typing(false);
            }
        });
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ChatState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn with_state(&self, f: impl FnOnce(&mut ChatState)) {
        f(&mut self.lock_state());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
