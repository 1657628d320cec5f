//! Audio: microphone capture → wire PCM, and wire PCM → speaker.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → AudioChunk (mpsc) → RecorderUnit
//!            → stereo_to_mono → StreamResampler (16 kHz) → pcm::encode → OutboundFrame
//!
//! InboundFrame (audio/pcm) → pcm::from_wire_text → PlayerUnit
//!            → pcm::decode → StreamResampler (device rate) → RingBuffer → cpal callback
//! ```
//!
//! [`AudioPipeline`] owns both directions while voice is on; the devices
//! themselves sit behind the [`AudioBackend`] trait.

pub mod buffer;
pub mod capture;
pub mod device;
pub mod pcm;
pub mod pipeline;
pub mod playback;
pub mod resample;
pub mod units;

pub use buffer::RingBuffer;
pub use capture::{AudioCapture, AudioChunk};
pub use device::{AudioBackend, CpalBackend, CpalStream, DeviceError, DeviceStream};
pub use pipeline::AudioPipeline;
pub use playback::AudioPlayback;
pub use resample::{stereo_to_mono, ResamplerError, StreamResampler};
pub use units::{PlayerUnit, RecorderUnit};
