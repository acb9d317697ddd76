//! # Streaming Playback Core
//!
//! Reassembles a live stream of independently encoded audio chunks and plays
//! them back without gaps.
//!
//! ## Overview
//!
//! This crate handles:
//! - Length-prefixed framing of an unbounded byte stream ([`framing`])
//! - Per-chunk decoding with symphonia ([`decoder`])
//! - Gapless scheduling on a shared output clock ([`scheduler`])
//! - Progress reporting while chunks are still arriving ([`progress`])
//! - Finalizing the stream into one WAV recording ([`finalizer`])
//! - Spectrum visualization of whatever is audible ([`visualizer`])
//!
//! [`StreamEngine`] ties them together, one attempt at a time.

pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod finalizer;
pub mod framing;
pub mod output;
pub mod progress;
pub mod ring_buffer;
pub mod scheduler;
pub mod sequencer;
pub mod traits;
pub mod visualizer;

pub use config::{StreamingConfig, VisualizerConfig};
pub use decoder::{FormatDetector, SampleConverter, SymphoniaChunkDecoder};
pub use engine::{EngineFrame, SessionOutcome, StreamEngine, StreamSession};
pub use error::{DecodeError, PlaybackError, Result, TruncationCause};
pub use finalizer::{AssetHandle, AssetId, FinalizedAsset, Finalizer};
pub use framing::{encode_frame, DemuxStats, FrameDemuxer};
pub use output::VirtualAudioOutput;
pub use progress::{format_clock, ProgressSnapshot, ProgressTracker};
pub use scheduler::{PlaybackScheduler, PlaybackState, ScheduledChunk, TimelineSnapshot};
pub use sequencer::ChunkSequencer;
pub use traits::{
    AttemptId, AudioCodec, AudioFormat, AudioOutput, ChunkDecoder, DecodedChunk, ScheduledVoice,
    VoiceEndedReceiver, VoiceEndedSender, VoiceId,
};
pub use visualizer::{Bar, VisualFrame, Visualizer};
