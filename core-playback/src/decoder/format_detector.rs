//! # Format Detection Module
//!
//! Recognizes a payload's container from its leading bytes and maps
//! symphonia codec types onto [`AudioCodec`].

use crate::error::DecodeError;
use crate::traits::AudioCodec;
use symphonia::core::codecs::CodecType;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Format detector for chunk payloads.
///
/// Chunks arrive without a file name or MIME type, so the probe hint is
/// built from magic bytes instead.
pub struct FormatDetector;

impl FormatDetector {
    /// Guess the codec from the first bytes of a payload.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_playback::{AudioCodec, FormatDetector};
    ///
    /// assert_eq!(FormatDetector::sniff(b"fLaC\0\0\0\x22"), AudioCodec::Flac);
    /// assert_eq!(FormatDetector::sniff(b"plain text"), AudioCodec::Unknown);
    /// ```
    pub fn sniff(payload: &[u8]) -> AudioCodec {
        match payload {
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => AudioCodec::Wav,
            [b'f', b'L', b'a', b'C', ..] => AudioCodec::Flac,
            [b'O', b'g', b'g', b'S', ..] => AudioCodec::Vorbis,
            [b'I', b'D', b'3', ..] => AudioCodec::Mp3,
            // MPEG audio frame sync: 11 set bits
            [0xFF, second, ..] if second & 0xE0 == 0xE0 => AudioCodec::Mp3,
            _ => AudioCodec::Unknown,
        }
    }

    /// Build a symphonia probe hint for a sniffed codec.
    pub fn hint_for(codec: AudioCodec) -> Hint {
        let mut hint = Hint::new();

        if let Some(extension) = codec.extension() {
            debug!("Setting probe hint extension: {}", extension);
            hint.with_extension(extension);
        } else {
            debug!("No magic bytes matched, probe will auto-detect");
        }

        hint
    }

    /// Convert symphonia's `CodecType` to [`AudioCodec`].
    pub fn detect_codec(codec_type: CodecType) -> AudioCodec {
        use symphonia::core::codecs::*;

        if codec_type == CODEC_TYPE_MP3 {
            AudioCodec::Mp3
        } else if codec_type == CODEC_TYPE_FLAC {
            AudioCodec::Flac
        } else if codec_type == CODEC_TYPE_VORBIS {
            AudioCodec::Vorbis
        } else if codec_type == CODEC_TYPE_PCM_S16LE
            || codec_type == CODEC_TYPE_PCM_S24LE
            || codec_type == CODEC_TYPE_PCM_S32LE
            || codec_type == CODEC_TYPE_PCM_U8
            || codec_type == CODEC_TYPE_PCM_F32LE
            || codec_type == CODEC_TYPE_PCM_F64LE
            || codec_type == CODEC_TYPE_PCM_ALAW
            || codec_type == CODEC_TYPE_PCM_MULAW
        {
            AudioCodec::Wav
        } else {
            warn!("Unknown codec type: {:?}", codec_type);
            AudioCodec::Unknown
        }
    }

    /// Check that the decoder for `codec` was compiled in.
    pub fn validate_codec_support(codec: AudioCodec) -> Result<(), DecodeError> {
        let enabled = match codec {
            AudioCodec::Wav => cfg!(feature = "decoder-wav"),
            AudioCodec::Mp3 => cfg!(feature = "decoder-mp3"),
            AudioCodec::Flac => cfg!(feature = "decoder-flac"),
            AudioCodec::Vorbis => cfg!(feature = "decoder-vorbis"),
            AudioCodec::Unknown => {
                return Err(DecodeError::UnsupportedFormat(
                    "Unknown audio codec".to_string(),
                ))
            }
        };

        if enabled {
            Ok(())
        } else {
            Err(DecodeError::UnsupportedFormat(format!(
                "{:?} decoder not enabled. Enable the 'decoder-{}' feature",
                codec,
                format!("{:?}", codec).to_lowercase()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::{CODEC_TYPE_FLAC, CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_S16LE};

    #[test]
    fn test_sniff_magic_bytes() {
        assert_eq!(FormatDetector::sniff(b"RIFF\x24\0\0\0WAVEfmt "), AudioCodec::Wav);
        assert_eq!(FormatDetector::sniff(b"OggS\0\x02"), AudioCodec::Vorbis);
        assert_eq!(FormatDetector::sniff(b"ID3\x04\0"), AudioCodec::Mp3);
        assert_eq!(FormatDetector::sniff(&[0xFF, 0xFB, 0x90, 0x00]), AudioCodec::Mp3);
    }

    #[test]
    fn test_sniff_rejects_near_misses() {
        // RIFF container that is not WAVE
        assert_eq!(FormatDetector::sniff(b"RIFF\x24\0\0\0AVI LIST"), AudioCodec::Unknown);
        assert_eq!(FormatDetector::sniff(&[0xFF, 0x00]), AudioCodec::Unknown);
        assert_eq!(FormatDetector::sniff(b""), AudioCodec::Unknown);
        assert_eq!(FormatDetector::sniff(b"RIFF"), AudioCodec::Unknown);
    }

    #[test]
    fn test_detect_codec() {
        assert_eq!(FormatDetector::detect_codec(CODEC_TYPE_PCM_S16LE), AudioCodec::Wav);
        assert_eq!(FormatDetector::detect_codec(CODEC_TYPE_PCM_F32LE), AudioCodec::Wav);
        assert_eq!(FormatDetector::detect_codec(CODEC_TYPE_FLAC), AudioCodec::Flac);
    }

    #[test]
    fn test_codec_validation() {
        assert!(FormatDetector::validate_codec_support(AudioCodec::Unknown).is_err());

        #[cfg(feature = "decoder-wav")]
        assert!(FormatDetector::validate_codec_support(AudioCodec::Wav).is_ok());
    }
}
