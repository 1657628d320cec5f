//! Conversion between native `f32` samples and the wire's base64 16-bit PCM.
//!
//! ```text
//! f32 [-1.0, 1.0] ──encode──▶ i16 LE bytes ──to_wire_text──▶ base64
//!                 ◀──decode──               ◀─from_wire_text─
//! ```
//!
//! # Example
//!
//! ```rust
//! use voice_chat_client::audio::pcm;
//!
//! let bytes = pcm::encode(&[0.0, 1.0, -1.0]);
//! assert_eq!(bytes, vec![0x00, 0x00, 0xff, 0x7f, 0x01, 0x80]);
//!
//! let text = pcm::to_wire_text(&bytes);
//! assert_eq!(pcm::from_wire_text(&text).unwrap(), bytes);
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::protocol::MalformedFrame;

/// Full-scale multiplier between `f32` and `i16` sample values.
const SCALE: f32 = 32_767.0;

/// Scale each sample by 32767, round to nearest, clamp to the `i16` range
/// and pack as little-endian bytes.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Unpack little-endian 16-bit PCM into `f32` samples in `[-1.0, 1.0]`.
///
/// A trailing odd byte is not a sample and is ignored.
pub fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            (value as f32 / SCALE).max(-1.0)
        })
        .collect()
}

/// Standard base64 with padding.
pub fn to_wire_text(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Inverse of [`to_wire_text`].
///
/// # Errors
///
/// Returns [`MalformedFrame::Base64`] when `text` is not valid base64.
pub fn from_wire_text(text: &str) -> Result<Vec<u8>, MalformedFrame> {
    Ok(BASE64.decode(text)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
