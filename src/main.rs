//! Application entry point: terminal voice chat.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (defaults on first run).
//! 3. Create a current-thread [`tokio`] runtime and a `LocalSet`.
//! 4. Spawn the [`SessionController`] as a local task.
//! 5. Spawn the renderer, which polls [`SharedState`] and prints changes.
//! 6. Read commands from stdin until `/quit` or EOF.
//!
//! # Commands
//!
//! ```text
//! <text>        send a chat message
//! /voice        start voice (microphone + speaker, audio mode)
//! /stop         stop voice and disconnect
//! /connect      enable the channel in the current mode
//! /disconnect   disable the channel
//! /quit         exit
//! ```

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use voice_chat_client::{
    audio::CpalBackend,
    config::AppConfig,
    connection::{ConnectionState, WsConnector},
    protocol::Role,
    session::{new_shared_state, ChatState, Command, SessionController, SharedState},
};

const RENDER_INTERVAL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Command(Command),
    Quit,
}

fn parse_line(line: &str) -> Option<Input> {
    let line = line.trim();
    let input = match line {
        "" => return None,
        "/quit" | "/exit" => Input::Quit,
        "/voice" => Input::Command(Command::StartVoice),
        "/stop" => Input::Command(Command::StopVoice),
        "/connect" => Input::Command(Command::SetChannelEnabled(true)),
        "/disconnect" => Input::Command(Command::SetChannelEnabled(false)),
        cmd if cmd.starts_with('/') => {
            eprintln!("unknown command {cmd}");
            return None;
        }
        text => Input::Command(Command::SendText(text.to_string())),
    };
    Some(input)
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Prints what changed in [`ChatState`] since the last call.
#[derive(Default)]
struct Renderer {
    revision: u64,
    connection: Option<ConnectionState>,
    audio_mode: bool,
    error: Option<String>,
    /// Bytes of each message already printed.
    printed: Vec<usize>,
    /// Model message whose line is still open for appended text.
    open: Option<usize>,
}

impl Renderer {
    fn render(&mut self, st: &ChatState, out: &mut impl Write) -> std::io::Result<()> {
        if st.revision() == self.revision {
            return Ok(());
        }
        self.revision = st.revision();

        if self.connection != Some(st.connection()) {
            self.connection = Some(st.connection());
            self.line(out, &format!("[{}]", st.connection().label().to_lowercase()))?;
        }
        if self.audio_mode != st.audio_mode() {
            self.audio_mode = st.audio_mode();
            let label = if self.audio_mode { "[voice on]" } else { "[voice off]" };
            self.line(out, label)?;
        }
        if self.error.as_deref() != st.last_error() {
            self.error = st.last_error().map(str::to_string);
            if let Some(e) = &self.error {
                self.line(out, &format!("[error] {e}"))?;
            }
        }

        for (i, message) in st.messages().iter().enumerate() {
            let text = message.text().unwrap_or_default();
            let done = self.printed.get(i).copied();

            match (done, message.role()) {
                (None, Role::User) => {
                    self.line(out, &format!("you> {text}"))?;
                }
                (None, Role::Model) => {
                    self.close_open(out)?;
                    write!(out, "agent> {text}")?;
                    self.open = Some(i);
                }
                (Some(n), _) if text.len() > n => {
                    let delta = &text[n..];
                    if self.open == Some(i) {
                        write!(out, "{delta}")?;
                    } else {
                        self.close_open(out)?;
                        write!(out, "agent> …{delta}")?;
                        self.open = Some(i);
                    }
                }
                _ => {}
            }

            match self.printed.get_mut(i) {
                Some(n) => *n = text.len(),
                None => self.printed.push(text.len()),
            }
        }

        if !st.typing() {
            self.close_open(out)?;
        }
        out.flush()
    }

    fn line(&mut self, out: &mut impl Write, text: &str) -> std::io::Result<()> {
        self.close_open(out)?;
        writeln!(out, "{text}")
    }

    fn close_open(&mut self, out: &mut impl Write) -> std::io::Result<()> {
        if self.open.take().is_some() {
            writeln!(out)?;
        }
        Ok(())
    }
}

async fn render_loop(state: SharedState) {
    let mut renderer = Renderer::default();
    let mut ticker = tokio::time::interval(RENDER_INTERVAL);
    loop {
        ticker.tick().await;
        let snapshot = match state.lock() {
            Ok(st) => st.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Err(e) = renderer.render(&snapshot, &mut std::io::stdout().lock()) {
            log::error!("render: {e}");
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice chat client starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Runtime.  The controller owns device streams that must stay on one
    //    thread, so it runs on a LocalSet.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&rt, run(config))
}

async fn run(config: AppConfig) -> Result<()> {
    let state = new_shared_state();

    // 4. Session controller
    let controller = SessionController::new(
        &config,
        Arc::clone(&state),
        Arc::new(WsConnector),
        Box::new(CpalBackend::new(config.audio.clone())),
    );
    println!("session {}", controller.session_id());

    let (command_tx, command_rx) = mpsc::unbounded_channel::<Command>();
    let session = tokio::task::spawn_local(controller.run(command_rx));

    // 5. Renderer
    let renderer = tokio::task::spawn_local(render_loop(Arc::clone(&state)));

    // 6. Stdin
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match parse_line(&line) {
            Some(Input::Quit) => break,
            Some(Input::Command(command)) => {
                if command_tx.send(command).is_err() {
                    break;
                }
            }
            None => {}
        }
    }

    drop(command_tx);
    session.await.context("session task failed")?;
    renderer.abort();
    log::info!("voice chat client exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_sent() {
        assert_eq!(
            parse_line("  hello there "),
            Some(Input::Command(Command::SendText("hello there".into())))
        );
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse_line("/voice"), Some(Input::Command(Command::StartVoice)));
        assert_eq!(parse_line("/stop"), Some(Input::Command(Command::StopVoice)));
        assert_eq!(
            parse_line("/connect"),
            Some(Input::Command(Command::SetChannelEnabled(true)))
        );
        assert_eq!(
            parse_line("/disconnect"),
            Some(Input::Command(Command::SetChannelEnabled(false)))
        );
        assert_eq!(parse_line("/quit"), Some(Input::Quit));
    }

    #[test]
    fn blank_and_unknown_lines_are_ignored() {
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("/dance"), None);
    }

    #[test]
    fn renderer_is_quiet_without_changes() {
        let mut renderer = Renderer::default();
        let mut out = Vec::new();
        renderer.render(&ChatState::default(), &mut out).expect("render");
        assert!(out.is_empty());
    }
}
