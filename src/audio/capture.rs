//! Microphone capture via `cpal`.
//!
//! [`AudioCapture`] wraps the cpal host/device/stream lifecycle.  Call
//! [`AudioCapture::start`] to begin streaming [`AudioChunk`]s over an mpsc
//! channel.  The returned [`CpalStream`] keeps the stream alive; dropping it
//! stops the hardware and closes the channel.

use std::sync::mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::device::{CpalStream, DeviceError};

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the cpal callback.
///
/// Samples are interleaved `f32` in the range `[-1.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate of this chunk in Hz (e.g. 44100, 48000, 16000).
    pub sample_rate: u32,
    /// Number of interleaved channels (1 = mono, 2 = stereo, …).
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// AudioCapture
// ---------------------------------------------------------------------------

/// Microphone device wrapper built on top of `cpal`.
///
/// Any failure to acquire the microphone is reported as
/// [`DeviceError::AccessDenied`], whether the device is missing or the OS
/// refuses to open the stream.
pub struct AudioCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_rate: u32,
    channels: u16,
}

impl AudioCapture {
    /// Open the input device called `name`, or the system default.
    pub fn new(name: Option<&str>) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = match name {
            Some(name) => host
                .input_devices()
                .map_err(|e| DeviceError::AccessDenied(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| n == name))
                .ok_or_else(|| DeviceError::AccessDenied(format!("no input device named {name:?}")))?,
            None => host
                .default_input_device()
                .ok_or_else(|| DeviceError::AccessDenied("no input device found".into()))?,
        };

        let supported = device
            .default_input_config()
            .map_err(|e| DeviceError::AccessDenied(e.to_string()))?;

        let channels = supported.channels();
        let sample_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        Ok(Self {
            device,
            config,
            sample_rate,
            channels,
        })
    }

    /// Start recording and send [`AudioChunk`]s to `tx`.
    ///
    /// The cpal callback runs on a dedicated audio thread.  Send errors
    /// (receiver dropped) are ignored so the audio thread never panics.
    pub fn start(&self, tx: mpsc::Sender<AudioChunk>) -> Result<CpalStream, DeviceError> {
        let sample_rate = self.sample_rate;
        let channels = self.channels;

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let chunk = AudioChunk {
                        samples: data.to_vec(),
                        sample_rate,
                        channels,
                    };
                    let _ = tx.send(chunk);
                },
                |err: cpal::StreamError| {
                    log::error!("capture: cpal stream error: {err}");
                },
                None,
            )
            .map_err(|e| DeviceError::AccessDenied(e.to_string()))?;

        stream
            .play()
            .map_err(|e| DeviceError::AccessDenied(e.to_string()))?;

        log::info!("capture: microphone open ({sample_rate} Hz, {channels} ch)");
        Ok(CpalStream::new(stream))
    }

    /// Native sample rate of the capture stream in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `AudioChunk` must be `Send` so it can cross to the encoder thread.
    #[test]
    fn audio_chunk_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AudioChunk>();
    }
}
