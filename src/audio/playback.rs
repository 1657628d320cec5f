//! Speaker output via `cpal`.
//!
//! [`AudioPlayback`] opens the output device at its preferred configuration
//! and drives a [`PlayerUnit`] from the cpal output callback.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::device::{CpalStream, DeviceError};
use super::units::PlayerUnit;

/// Output device wrapper built on top of `cpal`.
pub struct AudioPlayback {
    device: cpal::Device,
    config: cpal::StreamConfig,
}

impl AudioPlayback {
    /// Open the output device called `name`, or the system default.
    pub fn new(name: Option<&str>) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = match name {
            Some(name) => host
                .output_devices()
                .map_err(|e| DeviceError::Stream(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| n == name))
                .ok_or_else(|| DeviceError::Stream(format!("no output device named {name:?}")))?,
            None => host
                .default_output_device()
                .ok_or_else(|| DeviceError::Stream("no output device found".into()))?,
        };

        let config: cpal::StreamConfig = device
            .default_output_config()
            .map_err(|e| DeviceError::Stream(e.to_string()))?
            .into();

        Ok(Self { device, config })
    }

    /// Start rendering whatever `player` has queued.
    pub fn start(&self, player: PlayerUnit) -> Result<CpalStream, DeviceError> {
        let sample_rate = self.config.sample_rate.0;
        let channels = self.config.channels;
        player
            .set_output_format(sample_rate, channels)
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    player.render(data);
                },
                |err: cpal::StreamError| {
                    log::error!("playback: cpal stream error: {err}");
                },
                None,
            )
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        log::info!("playback: speaker open ({sample_rate} Hz, {channels} ch)");
        Ok(CpalStream::new(stream))
    }
}
