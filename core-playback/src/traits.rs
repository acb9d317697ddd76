//! # Core Playback Traits
//!
//! Abstractions the stream engine is written against.
//!
//! ## Architecture
//!
//! - **[`ChunkDecoder`]** turns one encoded payload into planar PCM. It is
//!   async so implementations can push the CPU work off the reactor; the
//!   engine runs several decodes at once and restores order afterwards.
//! - **[`AudioOutput`]** is the audible clock. The engine places
//!   [`ScheduledVoice`]s at absolute output times and the output reports back
//!   through a [`VoiceEndedSender`] when each voice finishes.
//!
//! ## Threading Model
//!
//! Both traits are `Send + Sync`: the decoder is shared by decode tasks, the
//! output by the pipeline task, the refresh loop and caller actions.
//! `AudioOutput` methods are synchronous and must not block; they model an
//! audio graph whose calls only enqueue work for the audio thread.

use crate::error::{DecodeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// Audio Format Types
// ============================================================================

/// Codecs a chunk payload may be encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// RIFF/WAVE, PCM or IEEE float
    Wav,
    /// MPEG-1 Audio Layer 3
    Mp3,
    /// Free Lossless Audio Codec
    Flac,
    /// Ogg Vorbis
    Vorbis,
    /// Not recognized from the payload's leading bytes
    Unknown,
}

impl AudioCodec {
    /// File extension used as a probe hint.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            AudioCodec::Wav => Some("wav"),
            AudioCodec::Mp3 => Some("mp3"),
            AudioCodec::Flac => Some("flac"),
            AudioCodec::Vorbis => Some("ogg"),
            AudioCodec::Unknown => None,
        }
    }
}

/// Sample layout shared by every chunk of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 24000, 44100)
    pub sample_rate: u32,
    /// Number of audio channels (1 = mono, 2 = stereo, etc.)
    pub channels: u16,
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz / {} ch", self.sample_rate, self.channels)
    }
}

// ============================================================================
// Decoded Audio
// ============================================================================

/// One decoded chunk of a stream.
///
/// Samples are planar: `planes[c][i]` is sample `i` of channel `c`, and every
/// plane has the same length. Chunks are immutable once produced and shared
/// through `Arc` between the scheduler, the output and the finalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChunk {
    /// Zero-based position of the chunk in its stream.
    pub sequence: u64,
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub planes: Vec<Vec<f32>>,
}

impl DecodedChunk {
    pub fn new(sequence: u64, codec: AudioCodec, sample_rate: u32, planes: Vec<Vec<f32>>) -> Self {
        Self {
            sequence,
            codec,
            sample_rate,
            planes,
        }
    }

    pub fn channel_count(&self) -> u16 {
        self.planes.len() as u16
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channel_count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Mono mix of frame `index`, or silence past the end.
    pub fn mono_sample(&self, index: usize) -> f32 {
        if self.planes.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .planes
            .iter()
            .map(|plane| plane.get(index).copied().unwrap_or(0.0))
            .sum();
        sum / self.planes.len() as f32
    }
}

// ============================================================================
// Scheduling Types
// ============================================================================

/// Identifies one stream attempt. Attempts are numbered in start order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}

/// Identifies one voice placed on the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VoiceId(pub u64);

/// A buffer placed on the output at an absolute output-clock time.
#[derive(Debug, Clone)]
pub struct ScheduledVoice {
    pub id: VoiceId,
    pub buffer: Arc<DecodedChunk>,
    /// Output-clock time in seconds at which the first sample is heard.
    pub start_at: f64,
}

impl ScheduledVoice {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.buffer.duration_seconds()
    }
}

/// Channel on which the output reports voices that played to completion.
pub type VoiceEndedSender = mpsc::UnboundedSender<VoiceId>;
pub type VoiceEndedReceiver = mpsc::UnboundedReceiver<VoiceId>;

// ============================================================================
// Decoder Trait
// ============================================================================

/// Decodes one self-contained encoded payload.
///
/// # Example
///
/// ```rust,no_run
/// use bytes::Bytes;
/// use core_playback::ChunkDecoder;
///
/// async fn decode_first(decoder: &dyn ChunkDecoder, payload: Bytes) {
///     match decoder.decode(0, payload).await {
///         Ok(chunk) => println!("{} s of audio", chunk.duration_seconds()),
///         Err(err) => println!("skipping chunk: {err}"),
///     }
/// }
/// ```
#[async_trait]
pub trait ChunkDecoder: Send + Sync {
    /// Decode `payload` into the chunk at position `sequence`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the payload is not a well-formed
    /// container or its sample format is unsupported.
    async fn decode(&self, sequence: u64, payload: Bytes) -> std::result::Result<DecodedChunk, DecodeError>;
}

// ============================================================================
// Output Trait
// ============================================================================

/// The audible side of playback: a monotonic clock plus voices scheduled on it.
///
/// The clock only advances while the output is not suspended, so positions
/// computed from it freeze on pause without rewriting any start time.
pub trait AudioOutput: Send + Sync {
    /// Current output-clock time in seconds.
    fn current_time(&self) -> f64;

    /// Sample rate the output renders at.
    fn sample_rate(&self) -> u32;

    /// Place a voice on the clock. `on_ended` receives the voice id once its
    /// last sample has played; stopped voices never report.
    ///
    /// A voice whose `start_at` has already passed keeps its place on the
    /// clock: only the part after "now" sounds and it still ends at
    /// `start_at + duration`.
    fn schedule(&self, voice: ScheduledVoice, on_ended: VoiceEndedSender) -> Result<()>;

    /// Halt a voice. Stopping an unknown or already finished voice is a no-op.
    fn stop(&self, id: VoiceId);

    /// Freeze the clock and every voice on it.
    fn suspend(&self) -> Result<()>;

    /// Continue from where [`suspend`](Self::suspend) froze.
    fn resume(&self) -> Result<()>;

    fn is_suspended(&self) -> bool;

    /// `true` while at least one voice is sounding on a running clock.
    fn is_audible(&self) -> bool;

    /// Copy the most recently rendered mono samples into `out`, oldest first.
    ///
    /// Returns how many samples were written. Fewer than `out.len()` means
    /// the output has not rendered that much yet.
    fn analyser_snapshot(&self, out: &mut [f32]) -> usize;
}
