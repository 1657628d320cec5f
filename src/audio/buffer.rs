//! Fixed-capacity circular (ring) buffer for `f32` audio samples.
//!
//! When the buffer is full, new samples **overwrite** the oldest data so that
//! the most-recent `capacity` samples are always available.  The player unit
//! uses it as its jitter queue: the network side pushes agent audio, the
//! output callback pops it one frame at a time.
//!
//! # Example
//!
//! ```rust
//! use voice_chat_client::audio::RingBuffer;
//!
//! let mut buf = RingBuffer::new(4);
//! buf.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]); // 5 items → capacity 4 → oldest dropped
//!
//! assert_eq!(buf.pop(), Some(2.0));
//! assert_eq!(buf.len(), 3);
//! ```

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// A fixed-capacity circular buffer.
///
/// ## Overflow behaviour
///
/// When [`push_slice`](Self::push_slice) would exceed `capacity`, the oldest
/// samples are silently overwritten.  The buffer never allocates beyond its
/// initial capacity.
pub struct RingBuffer<T> {
    buf: Vec<T>,
    capacity: usize,
    /// Index of the *next* write position (wraps around `capacity`).
    write_pos: usize,
    /// Number of valid samples currently stored (≤ `capacity`).
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a new ring buffer with the given `capacity`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            buf: vec![T::default(); capacity],
            capacity,
            write_pos: 0,
            len: 0,
        }
    }

    /// Append `data` to the buffer, overwriting the oldest samples on
    /// overflow.
    pub fn push_slice(&mut self, data: &[T]) {
        for &item in data {
            self.buf[self.write_pos] = item;
            self.write_pos = (self.write_pos + 1) % self.capacity;
            if self.len < self.capacity {
                self.len += 1;
            }
        }
    }

    /// Remove and return the oldest sample.  Never allocates.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.buf[self.read_pos()];
        self.len -= 1;
        Some(item)
    }

    /// Number of valid samples currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when the buffer contains no samples.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Oldest valid sample sits `len` slots behind the write position.
    fn read_pos(&self) -> usize {
        (self.write_pos + self.capacity - self.len) % self.capacity
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
