//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files.  Every section is
//! `#[serde(default)]`, so a partial `settings.toml` only overrides the keys
//! it names.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Where the remote agent lives and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Agent host, optionally with port (`"localhost:8000"`).
    ///
    /// An `http://` / `https://` prefix is accepted and selects `ws` / `wss`.
    /// An empty host disables connecting altogether.
    pub host: String,
    /// Use `wss` for a host given without a scheme prefix.
    pub secure: bool,
    /// Fixed delay before a lost channel is re-opened.
    pub reconnect_delay_secs: u64,
}

impl ServerConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8000".into(),
            secure: false,
            reconnect_delay_secs: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Per-session options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fixed session identifier.  `None` generates a fresh one per run.
    pub session_id: Option<String>,
    /// Start in audio mode with the channel enabled.
    pub audio_by_default: bool,
    /// Open the channel in text mode at startup.
    pub connect_on_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            audio_by_default: false,
            connect_on_start: true,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for microphone capture and speaker playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate of the PCM the agent expects from us, in Hz (must be 16 000).
    pub capture_sample_rate: u32,
    /// Rate of the PCM the agent sends back, in Hz (must be 24 000).
    pub playback_sample_rate: u32,
    /// Seconds of agent audio the player can hold before overwriting the
    /// oldest samples.
    pub playback_buffer_secs: u32,
    /// Input device name; `None` means the system default.
    pub input_device: Option<String>,
    /// Output device name; `None` means the system default.
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16_000,
            playback_sample_rate: 24_000,
            playback_buffer_secs: 180,
            input_device: None,
            output_device: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_chat_client::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Remote agent address settings.
    pub server: ServerConfig,
    /// Session identity and startup behaviour.
    pub session: SessionConfig,
    /// Audio device settings.
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
