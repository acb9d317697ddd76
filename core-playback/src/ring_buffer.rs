//! # Analyser Ring Buffer
//!
//! Fixed-size history of the most recently rendered mono samples.
//!
//! ## Design
//!
//! - **Writer**: the output's render step appends every sample it mixes.
//! - **Reader**: the visualizer copies the newest window for spectrum
//!   analysis. Reads never consume; the same window can be read twice.
//! - **Overwrite Policy**: once full, each write overwrites the oldest sample.
//!
//! ## Usage
//!
//! ```rust
//! use core_playback::ring_buffer::RingBuffer;
//!
//! let tap = RingBuffer::new(4);
//! tap.write(&[0.1, 0.2, 0.3, 0.4, 0.5]);
//!
//! let mut window = [0.0f32; 3];
//! assert_eq!(tap.latest(&mut window), 3);
//! assert_eq!(window, [0.3, 0.4, 0.5]);
//! ```

use parking_lot::Mutex;
use std::sync::Arc;

/// Shared, cloneable sample history.
#[derive(Clone)]
pub struct RingBuffer {
    inner: Arc<Mutex<RingBufferState>>,
    capacity: usize,
}

struct RingBufferState {
    samples: Vec<f32>,
    write_pos: usize,
    filled: usize,
}

impl RingBuffer {
    /// Create a history holding `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(RingBufferState {
                samples: vec![0.0; capacity],
                write_pos: 0,
                filled: 0,
            })),
            capacity,
        }
    }

    /// Append samples, overwriting the oldest once full.
    pub fn write(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        // Only the tail can survive a write longer than the buffer.
        let skip = samples.len().saturating_sub(self.capacity);
        let samples = &samples[skip..];

        let mut state = self.inner.lock();
        for &sample in samples {
            let pos = state.write_pos;
            state.samples[pos] = sample;
            state.write_pos = (pos + 1) % self.capacity;
        }
        state.filled = (state.filled + samples.len()).min(self.capacity);
    }

    /// Copy the newest `out.len()` samples into `out`, oldest first.
    ///
    /// Returns how many were copied; fewer than requested means the history
    /// is not that long yet. Copied samples sit at the start of `out`.
    pub fn latest(&self, out: &mut [f32]) -> usize {
        let state = self.inner.lock();
        let count = out.len().min(state.filled);
        let start = (state.write_pos + self.capacity - count) % self.capacity;

        for (i, slot) in out.iter_mut().take(count).enumerate() {
            *slot = state.samples[(start + i) % self.capacity];
        }

        count
    }

    /// Samples currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().filled
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forget all history.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.samples.fill(0.0);
        state.write_pos = 0;
        state.filled = 0;
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_creation() {
        let buffer = RingBuffer::new(1024);
        assert_eq!(buffer.capacity(), 1024);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_history() {
        let buffer = RingBuffer::new(8);
        buffer.write(&[1.0, 2.0]);

        let mut out = [0.0f32; 4];
        assert_eq!(buffer.latest(&mut out), 2);
        assert_eq!(&out[..2], &[1.0, 2.0]);
    }

    #[test]
    fn test_wrap_around_keeps_newest() {
        let buffer = RingBuffer::new(4);
        buffer.write(&[1.0, 2.0, 3.0]);
        buffer.write(&[4.0, 5.0, 6.0]);

        let mut out = [0.0f32; 4];
        assert_eq!(buffer.latest(&mut out), 4);
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_oversized_write_keeps_tail() {
        let buffer = RingBuffer::new(3);
        buffer.write(&[1.0, 2.0, 3.0, 4.0, 5.0]);

        let mut out = [0.0f32; 3];
        buffer.latest(&mut out);
        assert_eq!(out, [3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_reads_do_not_consume() {
        let buffer = RingBuffer::new(4);
        buffer.write(&[0.5, 0.25]);

        let mut first = [0.0f32; 2];
        let mut second = [0.0f32; 2];
        buffer.latest(&mut first);
        buffer.latest(&mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn test_ring_buffer_clear() {
        let buffer = RingBuffer::new(4);
        buffer.write(&[1.0; 4]);
        buffer.clear();

        let mut out = [9.0f32; 2];
        assert_eq!(buffer.latest(&mut out), 0);
        assert!(buffer.is_empty());
    }
}
