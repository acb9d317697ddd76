//! # Frame Demuxer
//!
//! Splits an unbounded byte stream into length-prefixed payloads.
//!
//! ## Wire Format
//!
//! ```text
//! ┌──────────────────────┬───────────────────────────┐
//! │ length: u32 (LE)     │ payload: `length` bytes   │  repeated
//! └──────────────────────┴───────────────────────────┘
//! ```
//!
//! A frame with `length == 0` is a keep-alive: it is consumed and counted but
//! produces no payload. Network reads split frames arbitrarily, so a prefix
//! or a payload may arrive across any number of reads; the demuxer keeps the
//! incomplete tail and prepends it to the next read.

use crate::error::{PlaybackError, Result, TruncationCause};
use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

/// Size of the little-endian length prefix in bytes.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Counters describing what a demuxer has consumed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    /// Frames with a non-empty payload.
    pub frames: u64,
    /// Zero-length frames skipped.
    pub keep_alives: u64,
    /// Every byte fed in, prefixes included.
    pub bytes_received: u64,
    /// Payload bytes handed out.
    pub payload_bytes: u64,
}

/// Incremental length-prefixed frame parser.
///
/// # Example
///
/// ```rust
/// use core_playback::framing::FrameDemuxer;
///
/// let mut demuxer = FrameDemuxer::new(1024);
/// let mut wire = Vec::new();
/// wire.extend_from_slice(&3u32.to_le_bytes());
/// wire.extend_from_slice(b"abc");
///
/// assert!(demuxer.feed(&wire[..2]).unwrap().is_empty());
/// let payloads = demuxer.feed(&wire[2..]).unwrap();
/// assert_eq!(payloads, vec![bytes::Bytes::from_static(b"abc")]);
/// ```
#[derive(Debug)]
pub struct FrameDemuxer {
    buffer: BytesMut,
    max_frame_bytes: usize,
    stats: DemuxStats,
}

impl FrameDemuxer {
    /// Create a demuxer that rejects frames larger than `max_frame_bytes`.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_bytes,
            stats: DemuxStats::default(),
        }
    }

    /// Append one network read and return every payload it completed, in order.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::FrameTooLarge`] when a length prefix exceeds the limit.
    /// The demuxer is unusable afterwards.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Bytes>> {
        self.stats.bytes_received += bytes.len() as u64;
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(length) = self.peek_length() {
            if length > self.max_frame_bytes {
                return Err(PlaybackError::FrameTooLarge {
                    length,
                    limit: self.max_frame_bytes,
                });
            }

            if self.buffer.len() < LENGTH_PREFIX_BYTES + length {
                break;
            }

            self.buffer.advance(LENGTH_PREFIX_BYTES);
            if length == 0 {
                self.stats.keep_alives += 1;
                trace!("keep-alive frame skipped");
                continue;
            }

            let payload = self.buffer.split_to(length).freeze();
            self.stats.frames += 1;
            self.stats.payload_bytes += length as u64;
            payloads.push(payload);
        }

        Ok(payloads)
    }

    /// Bytes held back because their frame is not complete yet.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    /// Close the stream cleanly.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::TruncatedStream`] if an incomplete frame is left over.
    pub fn finish(self) -> Result<DemuxStats> {
        self.finish_with(TruncationCause::EndOfStream)
    }

    /// Close the stream because of `cause`. Leftover bytes make it a
    /// truncation; a timeout or transport error always does.
    pub(crate) fn finish_with(self, cause: TruncationCause) -> Result<DemuxStats> {
        let buffered = self.buffer.len();
        if buffered > 0 || cause != TruncationCause::EndOfStream {
            return Err(PlaybackError::TruncatedStream { buffered, cause });
        }
        Ok(self.stats)
    }

    fn peek_length(&self) -> Option<usize> {
        if self.buffer.len() < LENGTH_PREFIX_BYTES {
            return None;
        }
        let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
        prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_BYTES]);
        Some(u32::from_le_bytes(prefix) as usize)
    }
}

/// Encode `payload` as one frame. Used by tests and loopback tools.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame.freeze()
}
