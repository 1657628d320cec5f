//! The recorder and player units that sit between the audio devices and the
//! rest of the client.
//!
//! ```text
//! device callback ─AudioChunk─▶ RecorderUnit ─OutboundFrame─▶ uplink
//!                               (mono, 16 kHz, PCM16, base64)
//!
//! agent PCM16 ─post_pcm─▶ PlayerUnit ─render─▶ device callback
//!              (24 kHz → device rate, ring-buffered)
//! ```
//!
//! Both are cheap to clone and safe to move onto device threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use super::buffer::RingBuffer;
use super::capture::AudioChunk;
use super::pcm;
use super::resample::{stereo_to_mono, ResamplerError, StreamResampler};
use crate::protocol::OutboundFrame;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// RecorderUnit
// ---------------------------------------------------------------------------

/// Turns captured device blocks into outbound audio frames.
#[derive(Clone)]
pub struct RecorderUnit {
    /// Recording-active flag owned by the pipeline.
    active: Arc<AtomicBool>,
    uplink: mpsc::UnboundedSender<OutboundFrame>,
    /// Wire capture rate (16 kHz).
    target_rate: u32,
    /// Device rate → wire rate.  Built for the first block's rate unless
    /// [`set_input_rate`](Self::set_input_rate) ran first.
    resampler: Arc<Mutex<Option<StreamResampler>>>,
}

impl RecorderUnit {
    pub fn new(
        active: Arc<AtomicBool>,
        uplink: mpsc::UnboundedSender<OutboundFrame>,
        target_rate: u32,
    ) -> Self {
        Self {
            active,
            uplink,
            target_rate,
            resampler: Arc::new(Mutex::new(None)),
        }
    }

    /// Prepare the resampler for a device running at `rate`.
    pub fn set_input_rate(&self, rate: u32) -> Result<(), ResamplerError> {
        let resampler = StreamResampler::new(rate, self.target_rate)?;
        *lock(&self.resampler) = Some(resampler);
        Ok(())
    }

    /// Encode one captured block and queue it for sending.
    ///
    /// Output that does not yet fill a resampler block is held for the next
    /// call.  Returns `false` when the block was discarded: recording is not
    /// active, the block was empty, conversion failed, or the uplink is gone.
    pub fn push(&self, chunk: &AudioChunk) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }

        let mono = stereo_to_mono(&chunk.samples, chunk.channels);
        if mono.is_empty() {
            return false;
        }

        let block = {
            let mut slot = lock(&self.resampler);
            if slot.as_ref().map(StreamResampler::source_rate) != Some(chunk.sample_rate) {
                match StreamResampler::new(chunk.sample_rate, self.target_rate) {
                    Ok(resampler) => {
                        log::debug!("recorder: converting {} Hz input", chunk.sample_rate);
                        *slot = Some(resampler);
                    }
                    Err(e) => {
                        log::error!("recorder: {e}");
                        return false;
                    }
                }
            }
            let Some(resampler) = slot.as_mut() else {
                return false;
            };
            match resampler.process(&mono) {
                Ok(block) => block,
                Err(e) => {
                    log::error!("recorder: {e}");
                    return false;
                }
            }
        };

        if block.is_empty() {
            return true;
        }

        log::trace!("recorder: {} samples @ {} Hz", block.len(), self.target_rate);
        self.uplink
            .send(OutboundFrame::audio(&pcm::encode(&block)))
            .is_ok()
    }
}

// ---------------------------------------------------------------------------
// PlayerUnit
// ---------------------------------------------------------------------------

struct PlayerQueue {
    samples: RingBuffer<f32>,
    output_channels: u16,
}

/// Queues agent audio and renders it into device output buffers.
///
/// Audio arrives as mono PCM at the wire playback rate; it is resampled to
/// the device rate on arrival and duplicated across output channels when
/// rendered.  Underrun renders silence.
///
/// The queue lock is shared with the device callback and is held only to
/// push or pop samples.  Conversion runs under a separate lock the callback
/// never takes.
#[derive(Clone)]
pub struct PlayerUnit {
    queue: Arc<Mutex<PlayerQueue>>,
    /// Wire rate → device rate; `None` until the device rate differs.
    resampler: Arc<Mutex<Option<StreamResampler>>>,
    /// Wire playback rate (24 kHz).
    source_rate: u32,
    buffer_secs: u32,
}

impl PlayerUnit {
    /// A mono player at `source_rate` holding up to `buffer_secs` of audio.
    pub fn new(source_rate: u32, buffer_secs: u32) -> Self {
        Self {
            queue: Arc::new(Mutex::new(PlayerQueue {
                samples: RingBuffer::new(Self::capacity(source_rate, buffer_secs)),
                output_channels: 1,
            })),
            resampler: Arc::new(Mutex::new(None)),
            source_rate,
            buffer_secs,
        }
    }

    fn capacity(rate: u32, secs: u32) -> usize {
        (rate as usize * secs as usize).max(1)
    }

    /// Match the device the unit renders into.  Discards queued audio.
    pub fn set_output_format(&self, sample_rate: u32, channels: u16) -> Result<(), ResamplerError> {
        let resampler = if sample_rate == self.source_rate {
            None
        } else {
            Some(StreamResampler::new(self.source_rate, sample_rate)?)
        };
        *lock(&self.resampler) = resampler;

        let mut queue = lock(&self.queue);
        queue.samples = RingBuffer::new(Self::capacity(sample_rate, self.buffer_secs));
        queue.output_channels = channels.max(1);
        Ok(())
    }

    /// Queue one block of 16-bit PCM from the agent.  Never blocks on the
    /// device.
    pub fn post_pcm(&self, bytes: &[u8]) {
        let samples = pcm::decode(bytes);
        let converted = match lock(&self.resampler).as_mut() {
            Some(resampler) => match resampler.process(&samples) {
                Ok(converted) => converted,
                Err(e) => {
                    log::warn!("player: dropping {} samples: {e}", samples.len());
                    return;
                }
            },
            None => samples,
        };
        lock(&self.queue).samples.push_slice(&converted);
    }

    /// Fill an interleaved device buffer; returns the number of frames that
    /// carried queued audio.  Does not allocate.
    pub fn render(&self, out: &mut [f32]) -> usize {
        let mut queue = lock(&self.queue);
        let channels = queue.output_channels as usize;

        let mut filled = 0;
        let mut frames = out.chunks_exact_mut(channels);
        for frame in &mut frames {
            let sample = match queue.samples.pop() {
                Some(sample) => {
                    filled += 1;
                    sample
                }
                None => 0.0,
            };
            frame.fill(sample);
        }
        // Partial trailing frame, if any.
        frames.into_remainder().fill(0.0);
        filled
    }

    /// Samples waiting to be rendered, at the output rate.
    pub fn queued(&self) -> usize {
        lock(&self.queue).samples.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(active: bool) -> (RecorderUnit, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            RecorderUnit::new(Arc::new(AtomicBool::new(active)), tx, 16_000),
            rx,
        )
    }

    // ---- RecorderUnit ------------------------------------------------------

    #[test]
    fn recorder_encodes_mono_block_at_capture_rate() {
        let (unit, mut rx) = recorder(true);
        let chunk = AudioChunk {
            samples: vec![0.5_f32; 320], // 160 stereo frames @ 16 kHz
            sample_rate: 16_000,
            channels: 2,
        };

        assert!(unit.push(&chunk));

        let frame = rx.try_recv().expect("frame queued");
        assert!(frame.is_audio());
        let bytes = pcm::from_wire_text(&frame.data).expect("base64");
        assert_eq!(bytes.len(), 160 * 2);
        assert_eq!(&bytes[..2], &16_384_i16.to_le_bytes());
    }

    #[test]
    fn recorder_resamples_device_rate_down() {
        let (unit, mut rx) = recorder(true);
        let chunk = AudioChunk {
            samples: vec![0.0_f32; 480], // one 10 ms block @ 48 kHz
            sample_rate: 48_000,
            channels: 1,
        };

        assert!(unit.push(&chunk));
        let frame = rx.try_recv().expect("frame queued");
        let samples = pcm::from_wire_text(&frame.data).expect("base64").len() / 2;
        assert!(samples.abs_diff(160) <= 1, "got {samples}");
    }

    #[test]
    fn recorder_holds_partial_blocks_until_complete() {
        let (unit, mut rx) = recorder(true);
        unit.set_input_rate(44_100).expect("resampler");
        let chunk = AudioChunk {
            samples: vec![0.0_f32; 300],
            sample_rate: 44_100,
            channels: 1,
        };

        assert!(unit.push(&chunk));
        assert!(rx.try_recv().is_err());

        assert!(unit.push(&chunk));
        let frame = rx.try_recv().expect("frame queued");
        let samples = pcm::from_wire_text(&frame.data).expect("base64").len() / 2;
        assert!(samples.abs_diff(160) <= 1, "got {samples}");
    }

    #[test]
    fn recorder_output_tracks_device_rate_over_a_long_stream() {
        let (unit, mut rx) = recorder(true);
        let chunk = AudioChunk {
            samples: vec![0.0_f32; 512],
            sample_rate: 44_100,
            channels: 1,
        };

        for _ in 0..500 {
            assert!(unit.push(&chunk));
        }

        let mut sent = 0;
        while let Ok(frame) = rx.try_recv() {
            sent += pcm::from_wire_text(&frame.data).expect("base64").len() / 2;
        }
        let exact = 500.0 * 512.0 * 16_000.0 / 44_100.0;
        let shortfall = exact - sent as f64;
        assert!((-2.0..=162.0).contains(&shortfall), "{sent} vs {exact:.1}");
    }

    #[test]
    fn inactive_recorder_discards_blocks() {
        let (unit, mut rx) = recorder(false);
        let chunk = AudioChunk {
            samples: vec![0.1; 160],
            sample_rate: 16_000,
            channels: 1,
        };

        assert!(!unit.push(&chunk));
        assert!(rx.try_recv().is_err());
    }

    // ---- PlayerUnit --------------------------------------------------------

    #[test]
    fn player_renders_queued_audio_then_silence() {
        let player = PlayerUnit::new(24_000, 1);
        player.post_pcm(&pcm::encode(&[0.25, 0.5]));

        let mut out = [1.0_f32; 4];
        assert_eq!(player.render(&mut out), 2);
        assert!((out[0] - 0.25).abs() < 1e-4);
        assert!((out[1] - 0.5).abs() < 1e-4);
        assert_eq!(&out[2..], &[0.0, 0.0]);
    }

    #[test]
    fn player_duplicates_mono_across_channels() {
        let player = PlayerUnit::new(24_000, 1);
        player.set_output_format(24_000, 2).expect("format");
        player.post_pcm(&pcm::encode(&[0.5]));

        let mut out = [0.0_f32; 4];
        assert_eq!(player.render(&mut out), 1);
        assert!((out[0] - 0.5).abs() < 1e-4);
        assert!((out[1] - 0.5).abs() < 1e-4);
        assert_eq!(&out[2..], &[0.0, 0.0]);
    }

    #[test]
    fn player_resamples_to_output_rate() {
        let player = PlayerUnit::new(24_000, 1);
        player.set_output_format(48_000, 1).expect("format");
        player.post_pcm(&pcm::encode(&[0.1_f32; 240]));

        assert!(player.queued().abs_diff(480) <= 2, "got {}", player.queued());
    }

    #[test]
    fn render_proceeds_while_agent_audio_is_converting() {
        let player = PlayerUnit::new(24_000, 1);
        player.set_output_format(48_000, 1).expect("format");
        player.post_pcm(&pcm::encode(&[0.1_f32; 240]));
        let queued = player.queued();

        // Conversion state held elsewhere must not stall the device side.
        let _converting = player.resampler.lock().expect("resampler lock");
        let mut out = [0.0_f32; 64];
        assert_eq!(player.render(&mut out), 64);
        assert_eq!(player.queued(), queued - 64);
    }

    #[test]
    fn repeated_renders_drain_in_order_across_callbacks() {
        let player = PlayerUnit::new(24_000, 1);
        player.set_output_format(24_000, 2).expect("format");
        player.post_pcm(&pcm::encode(&[0.1, 0.2, 0.3]));

        let mut out = [9.0_f32; 5]; // two stereo frames plus one stray slot
        assert_eq!(player.render(&mut out), 2);
        assert!((out[0] - 0.1).abs() < 1e-4);
        assert!((out[3] - 0.2).abs() < 1e-4);
        assert_eq!(out[4], 0.0);

        assert_eq!(player.render(&mut out), 1);
        assert!((out[1] - 0.3).abs() < 1e-4);
        assert_eq!(&out[2..], &[0.0, 0.0, 0.0]);

        assert_eq!(player.render(&mut out), 0);
        assert_eq!(out, [0.0; 5]);
    }

    #[test]
    fn player_overflow_keeps_newest_audio() {
        let player = PlayerUnit::new(4, 1); // 4-sample queue
        player.post_pcm(&pcm::encode(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]));

        let mut out = [0.0_f32; 4];
        player.render(&mut out);
        assert!((out[0] - 0.3).abs() < 1e-4);
        assert!((out[3] - 0.6).abs() < 1e-4);
    }
}
