//! Audio pipeline: owns the microphone and speaker while voice is on.
//!
//! ```text
//! start():  playback sink (24 kHz) ─▶ capture source (16 kHz) ─▶ recording = true
//! stop():   recording = false ─▶ release capture ─▶ release playback
//! ```
//!
//! `start()` is all-or-nothing: if the microphone cannot be acquired the
//! already-opened speaker is released before the error is returned.
//! `stop()` is best-effort: every release step runs even when an earlier
//! one fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::device::{AudioBackend, DeviceError, DeviceStream};
use super::units::{PlayerUnit, RecorderUnit};
use crate::config::AudioConfig;
use crate::protocol::OutboundFrame;

pub struct AudioPipeline {
    backend: Box<dyn AudioBackend>,
    capture_rate: u32,
    playback_rate: u32,
    playback_buffer_secs: u32,
    /// Checked by the recorder on every captured block.
    recording: Arc<AtomicBool>,
    player: Option<PlayerUnit>,
    playback_stream: Option<Box<dyn DeviceStream>>,
    capture_stream: Option<Box<dyn DeviceStream>>,
}

impl AudioPipeline {
    pub fn new(backend: Box<dyn AudioBackend>, config: &AudioConfig) -> Self {
        Self {
            backend,
            capture_rate: config.capture_sample_rate,
            playback_rate: config.playback_sample_rate,
            playback_buffer_secs: config.playback_buffer_secs,
            recording: Arc::new(AtomicBool::new(false)),
            player: None,
            playback_stream: None,
            capture_stream: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Acquire speaker and microphone; captured audio is sent on `uplink`
    /// as [`OutboundFrame::audio`] frames.
    ///
    /// Calling `start` while already recording is a no-op.
    ///
    /// # Errors
    ///
    /// [`DeviceError::AccessDenied`] when the microphone is unavailable, or
    /// [`DeviceError::Stream`] when the speaker is.  No device is held
    /// afterwards in either case.
    pub fn start(&mut self, uplink: mpsc::UnboundedSender<OutboundFrame>) -> Result<(), DeviceError> {
        if self.is_recording() {
            return Ok(());
        }

        let player = PlayerUnit::new(self.playback_rate, self.playback_buffer_secs);
        let mut playback = self.backend.open_playback(player.clone())?;

        let recorder = RecorderUnit::new(Arc::clone(&self.recording), uplink, self.capture_rate);
        let capture = match self.backend.open_capture(recorder) {
            Ok(stream) => stream,
            Err(e) => {
                release("playback", &mut playback);
                return Err(e);
            }
        };

        self.player = Some(player);
        self.playback_stream = Some(playback);
        self.capture_stream = Some(capture);
        self.recording.store(true, Ordering::Release);

        log::info!(
            "audio: voice started (capture {} Hz, playback {} Hz)",
            self.capture_rate,
            self.playback_rate
        );
        Ok(())
    }

    /// Release everything `start` acquired.  Safe to call at any time.
    pub fn stop(&mut self) {
        let was_recording = self.recording.swap(false, Ordering::AcqRel);

        if let Some(mut capture) = self.capture_stream.take() {
            release("capture", &mut capture);
        }
        if let Some(mut playback) = self.playback_stream.take() {
            release("playback", &mut playback);
        }
        self.player = None;

        if was_recording {
            log::info!("audio: voice stopped");
        }
    }

    /// Hand one block of agent PCM to the player.  Dropped when voice is off.
    pub fn playback(&self, pcm_bytes: &[u8]) {
        match &self.player {
            Some(player) => player.post_pcm(pcm_bytes),
            None => log::trace!("audio: no player, dropping {} bytes", pcm_bytes.len()),
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn release(what: &str, stream: &mut Box<dyn DeviceStream>) {
    if let Err(e) = stream.stop() {
        log::warn!("audio: {what} teardown: {e}");
    }
}

// ---------------------------------------------------------------------------
// MockBackend  (test-only)
// ---------------------------------------------------------------------------

/// Scripted audio devices for pipeline and session tests.
#[cfg(test)]
pub use mock::{MockBackend, MockDevices};


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::AudioChunk;
    use crate::audio::pcm;

    fn pipeline(backend: &MockBackend) -> AudioPipeline {
        AudioPipeline::new(Box::new(backend.clone()), &AudioConfig::default())
    }

    fn block() -> AudioChunk {
        AudioChunk {
            samples: vec![0.25; 160],
            sample_rate: 16_000,
            channels: 1,
        }
    }

    #[test]
    fn start_acquires_both_devices_then_records() {
        let backend = MockBackend::default();
        let mut audio = pipeline(&backend);
        let (tx, mut rx) = mpsc::unbounded_channel();

        audio.start(tx).expect("start");

        assert!(audio.is_recording());
        assert_eq!(backend.open_streams(), 2);

        let recorder = backend.recorder().expect("recorder wired");
        assert!(recorder.push(&block()));
        assert!(rx.try_recv().expect("frame").is_audio());
    }

    #[test]
    fn denied_microphone_leaves_nothing_behind() {
        let backend = MockBackend::denying_microphone();
        let mut audio = pipeline(&backend);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = audio.start(tx).expect_err("must fail");

        assert!(matches!(err, DeviceError::AccessDenied(_)));
        assert!(!audio.is_recording());
        assert_eq!(backend.open_streams(), 0);
        assert_eq!(backend.devices.lock().unwrap().stops, 1);
    }

    #[test]
    fn stop_silences_recorder_before_release() {
        let backend = MockBackend::default();
        let mut audio = pipeline(&backend);
        let (tx, mut rx) = mpsc::unbounded_channel();
        audio.start(tx).expect("start");
        let recorder = backend.recorder().expect("recorder wired");

        audio.stop();

        assert!(!audio.is_recording());
        assert_eq!(backend.open_streams(), 0);
        assert!(!recorder.push(&block()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stop_runs_every_step_when_teardown_fails() {
        let backend = MockBackend::default();
        let mut audio = pipeline(&backend);
        let (tx, _rx) = mpsc::unbounded_channel();
        audio.start(tx).expect("start");
        backend.devices.lock().unwrap().fail_teardown = true;

        audio.stop();

        let devices = backend.devices.lock().unwrap();
        assert_eq!(devices.stops, 2);
        assert_eq!(devices.open_streams, 0);
    }

    #[test]
    fn stop_without_start_is_harmless() {
        let backend = MockBackend::default();
        let mut audio = pipeline(&backend);
        audio.stop();
        audio.stop();
        assert_eq!(backend.devices.lock().unwrap().stops, 0);
    }

    #[test]
    fn second_start_is_a_noop() {
        let backend = MockBackend::default();
        let mut audio = pipeline(&backend);
        let (tx, _rx) = mpsc::unbounded_channel();

        audio.start(tx.clone()).expect("start");
        audio.start(tx).expect("restart");

        assert_eq!(backend.open_streams(), 2);
    }

    #[test]
    fn playback_reaches_player_only_while_started() {
        let backend = MockBackend::default();
        let mut audio = pipeline(&backend);
        let bytes = pcm::encode(&[0.5; 24]);

        audio.playback(&bytes); // no player yet: dropped

        let (tx, _rx) = mpsc::unbounded_channel();
        audio.start(tx).expect("start");
        audio.playback(&bytes);

        assert_eq!(backend.player().expect("player").queued(), 24);
    }

    #[test]
    fn drop_releases_devices() {
        let backend = MockBackend::default();
        {
            let mut audio = pipeline(&backend);
            let (tx, _rx) = mpsc::unbounded_channel();
            audio.start(tx).expect("start");
        }
        assert_eq!(backend.open_streams(), 0);
    }
}
