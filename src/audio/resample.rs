//! Audio resampling and channel mixing utilities.
//!
//! Devices run at whatever rate and channel count they prefer; the wire
//! carries mono PCM at fixed rates.  This module provides the conversions in
//! both directions:
//!
//! 1. [`stereo_to_mono`]: channel downmix for capture.
//! 2. [`StreamResampler`]: band-limited rate conversion with `rubato`
//!    (`SincFixedIn` + `BlackmanHarris2` window) that carries its filter
//!    state and any partial input block from one call to the next.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use thiserror::Error;

/// Sinc filter length in input frames.
const SINC_LEN: usize = 128;

/// Fraction of the lower Nyquist frequency that passes the filter.
const F_CUTOFF: f32 = 0.95;

// ---------------------------------------------------------------------------
// stereo_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// The output length is `samples.len() / channels`.
///
/// * If `channels == 1` the input slice is returned as an owned `Vec`.
/// * If `channels == 0` an empty vector is returned.
///
/// # Example
///
/// ```rust
/// use voice_chat_client::audio::stereo_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, -0.2]; // L R L R
/// let mono = stereo_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// ```
pub fn stereo_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ResamplerError {
    #[error("unsupported rate conversion {from} Hz -> {to} Hz")]
    UnsupportedRate { from: u32, to: u32 },

    #[error("resampler setup failed: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// Converts a continuous mono stream from one rate to another.
///
/// Input is consumed in fixed 10 ms blocks.  Whatever does not fill a whole
/// block waits for the next call, so splitting a signal into arbitrary
/// pieces yields the same output as converting it in one go.  Output lags
/// input by the filter delay plus at most one block.
///
/// Equal rates pass samples through untouched.
///
/// # Example
///
/// ```rust
/// use voice_chat_client::audio::StreamResampler;
///
/// let mut to_wire = StreamResampler::new(48_000, 16_000).unwrap();
/// // 5 ms is less than one block: held back.
/// assert!(to_wire.process(&[0.0; 240]).unwrap().is_empty());
/// // The next 5 ms completes the block.
/// let out = to_wire.process(&[0.0; 240]).unwrap();
/// assert!(out.len().abs_diff(160) <= 1);
/// ```
pub struct StreamResampler {
    source_rate: u32,
    target_rate: u32,
    /// `None` when the rates match.
    sinc: Option<SincFixedIn<f32>>,
    /// Input not yet consumed by the filter.
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self, ResamplerError> {
        if source_rate == 0 || target_rate == 0 {
            return Err(ResamplerError::UnsupportedRate {
                from: source_rate,
                to: target_rate,
            });
        }

        let sinc = if source_rate == target_rate {
            None
        } else {
            let params = SincInterpolationParameters {
                sinc_len: SINC_LEN,
                f_cutoff: F_CUTOFF,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            };
            Some(SincFixedIn::<f32>::new(
                target_rate as f64 / source_rate as f64,
                1.1,
                params,
                block_frames(source_rate),
                1,
            )?)
        };

        Ok(Self {
            source_rate,
            target_rate,
            sinc,
            pending: Vec::new(),
        })
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Feed `samples` and return every output frame that is now complete.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, ResamplerError> {
        let Some(sinc) = self.sinc.as_mut() else {
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        let mut consumed = 0;
        loop {
            let need = sinc.input_frames_next();
            if self.pending.len() - consumed < need {
                break;
            }
            let block = sinc.process(&[&self.pending[consumed..consumed + need]], None)?;
            out.extend_from_slice(&block[0]);
            consumed += need;
        }
        self.pending.drain(..consumed);

        Ok(out)
    }

    /// Input frames held back waiting for a full block.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

fn block_frames(rate: u32) -> usize {
    (rate as usize / 100).max(1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
