//! Configuration module for the voice chat client.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the server,
//! session and audio subsystems, `AppPaths` for the platform config
//! directory, and TOML persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, AudioConfig, ServerConfig, SessionConfig};
