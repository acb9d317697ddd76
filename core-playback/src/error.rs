//! # Playback Error Types
//!
//! Error types for chunked stream playback.
//!
//! Two levels exist. [`DecodeError`] describes why a single payload could not
//! be turned into audio; the engine recovers from it by skipping the chunk.
//! [`PlaybackError`] is what the stream as a whole fails with.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why one encoded chunk could not be decoded.
///
/// Cloneable so the engine can both log it and put it in an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is not a recognizable or well-formed container.
    #[error("Invalid container: {0}")]
    InvalidContainer(String),

    /// Container parsed, but its codec or sample format is not supported.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Container parsed, but it holds no audio frames.
    #[error("Payload contains no audio")]
    Empty,

    /// Codec failed mid-payload.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The decode task was cancelled or panicked.
    #[error("Decode task failed: {0}")]
    TaskFailed(String),
}

/// What cut a stream short while a frame was still incomplete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TruncationCause {
    /// The transport reported a clean end of the body.
    EndOfStream,
    /// No bytes arrived within the read deadline.
    TimedOut(Duration),
    /// The transport failed.
    Transport(String),
}

impl fmt::Display for TruncationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TruncationCause::EndOfStream => write!(f, "stream ended"),
            TruncationCause::TimedOut(after) => {
                write!(f, "no data for {} ms", after.as_millis())
            }
            TruncationCause::Transport(message) => write!(f, "transport error: {}", message),
        }
    }
}

/// Errors that can occur while playing a chunked stream.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Stream Errors
    // ========================================================================
    /// The stream stopped inside a frame, or the transport gave out.
    #[error("Stream truncated with {buffered} unconsumed bytes: {cause}")]
    TruncatedStream {
        buffered: usize,
        cause: TruncationCause,
    },

    /// A length prefix announced a frame above the configured limit.
    #[error("Frame of {length} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { length: usize, limit: usize },

    /// The stream finished without producing a single playable chunk.
    #[error("Stream produced no playable audio ({skipped} chunks failed to decode)")]
    EmptyStream { skipped: usize },

    /// The stream was superseded or stopped before it completed.
    #[error("Stream cancelled")]
    Cancelled,

    // ========================================================================
    // Decode Errors
    // ========================================================================
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    // ========================================================================
    // Scheduling Errors
    // ========================================================================
    /// A timeline was touched by an attempt that does not own it.
    #[error("Scheduling conflict: {0}")]
    SchedulingConflict(String),

    /// The audio output refused an operation.
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    // ========================================================================
    // Finalization Errors
    // ========================================================================
    /// Chunks of one stream disagree on sample rate or channel count.
    #[error("Format mismatch in chunk {sequence}: expected {expected}, found {found}")]
    FormatMismatch {
        sequence: u64,
        expected: String,
        found: String,
    },

    /// Writing the finalized recording failed.
    #[error("Encoding error: {0}")]
    Encode(String),

    /// The recording handle was superseded or explicitly released.
    #[error("Recording {0} has been released")]
    AssetReleased(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if the error ends the stream. Decode errors only cost
    /// one chunk.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PlaybackError::Decode(_))
    }

    /// Returns `true` if the error came from the incoming byte stream itself.
    pub fn is_stream_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::TruncatedStream { .. }
                | PlaybackError::FrameTooLarge { .. }
                | PlaybackError::EmptyStream { .. }
        )
    }

    /// Returns `true` if re-requesting the same text may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlaybackError::TruncatedStream {
                cause: TruncationCause::TimedOut(_) | TruncationCause::Transport(_),
                ..
            }
        )
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
