//! # Chunk Decoder Module
//!
//! Decodes individual stream chunks with the Symphonia library.
//!
//! ## Supported Formats
//!
//! | Format | Codec | Feature Flag |
//! |--------|-------|--------------|
//! | WAV | PCM / IEEE float | `decoder-wav` |
//! | MP3 | MPEG-1/2 Audio Layer III | `decoder-mp3` |
//! | FLAC | Free Lossless Audio Codec | `decoder-flac` |
//! | Vorbis | Ogg Vorbis | `decoder-vorbis` |
//!
//! ## Pipeline
//!
//! ```text
//! payload → sniff magic bytes → probe → FormatReader → Decoder → planar f32
//! ```
//!
//! Each payload is a complete file on its own. Decoding is CPU bound and
//! runs on tokio's blocking pool so network reads keep flowing.

mod format_detector;
mod sample_converter;
mod symphonia;

pub use self::symphonia::SymphoniaChunkDecoder;
pub use format_detector::FormatDetector;
pub use sample_converter::SampleConverter;

#[cfg(not(any(
    feature = "decoder-wav",
    feature = "decoder-mp3",
    feature = "decoder-flac",
    feature = "decoder-vorbis"
)))]
compile_error!(
    "No chunk decoder enabled. Enable one of: \
     'decoder-wav', 'decoder-mp3', 'decoder-flac', 'decoder-vorbis', or 'decoder-all'"
);
