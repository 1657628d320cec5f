//! Audio device seam.
//!
//! [`AudioBackend`] is what the pipeline needs from the platform: a playback
//! sink feeding a [`PlayerUnit`] and a capture source feeding a
//! [`RecorderUnit`].  [`CpalBackend`] is the production implementation.

use std::sync::mpsc;

use cpal::traits::StreamTrait;
use thiserror::Error;

use super::capture::{AudioCapture, AudioChunk};
use super::playback::AudioPlayback;
use super::units::{PlayerUnit, RecorderUnit};
use crate::config::AudioConfig;

// ---------------------------------------------------------------------------
// DeviceError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    /// The user declined microphone access or no usable input exists.
    #[error("microphone access denied: {0}")]
    AccessDenied(String),

    /// The output device could not be opened.
    #[error("audio output unavailable: {0}")]
    Stream(String),

    /// Releasing a device failed.  Logged and otherwise ignored.
    #[error("audio device teardown failed: {0}")]
    Teardown(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A running device stream.  Dropping it releases the device.
pub trait DeviceStream {
    /// Halt the hardware before release.
    fn stop(&mut self) -> Result<(), DeviceError>;
}

/// Creates device streams for the audio pipeline.
pub trait AudioBackend {
    /// Open the speaker and render from `player`.
    fn open_playback(&mut self, player: PlayerUnit) -> Result<Box<dyn DeviceStream>, DeviceError>;

    /// Open the microphone and feed every captured block to `recorder`.
    fn open_capture(&mut self, recorder: RecorderUnit)
        -> Result<Box<dyn DeviceStream>, DeviceError>;
}

// ---------------------------------------------------------------------------
// cpal implementation
// ---------------------------------------------------------------------------

/// Keeps a cpal stream alive.
pub struct CpalStream {
    stream: cpal::Stream,
}

impl CpalStream {
    pub fn new(stream: cpal::Stream) -> Self {
        Self { stream }
    }
}

impl DeviceStream for CpalStream {
    fn stop(&mut self) -> Result<(), DeviceError> {
        self.stream
            .pause()
            .map_err(|e| DeviceError::Teardown(e.to_string()))
    }
}

/// System audio devices through `cpal`.
pub struct CpalBackend {
    config: AudioConfig,
}

impl CpalBackend {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

impl AudioBackend for CpalBackend {
    fn open_playback(&mut self, player: PlayerUnit) -> Result<Box<dyn DeviceStream>, DeviceError> {
        let playback = AudioPlayback::new(self.config.output_device.as_deref())?;
        Ok(Box::new(playback.start(player)?))
    }

    fn open_capture(
        &mut self,
        recorder: RecorderUnit,
    ) -> Result<Box<dyn DeviceStream>, DeviceError> {
        let capture = AudioCapture::new(self.config.input_device.as_deref())?;
        recorder
            .set_input_rate(capture.sample_rate())
            .map_err(|e| DeviceError::AccessDenied(e.to_string()))?;
        let (chunk_tx, chunk_rx) = mpsc::channel::<AudioChunk>();

        // Encoding happens off the cpal callback.  The thread ends when the
        // stream (and with it `chunk_tx`) is dropped.
        std::thread::Builder::new()
            .name("audio-encoder".into())
            .spawn(move || {
                while let Ok(chunk) = chunk_rx.recv() {
                    recorder.push(&chunk);
                }
                log::debug!("capture: encoder thread finished");
            })
            .map_err(|e| DeviceError::AccessDenied(format!("encoder thread: {e}")))?;

        Ok(Box::new(capture.start(chunk_tx)?))
    }
}
