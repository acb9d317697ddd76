//! # Symphonia Chunk Decoder
//!
//! Decodes one self-contained payload with symphonia on the blocking pool.

use crate::decoder::format_detector::FormatDetector;
use crate::decoder::sample_converter::SampleConverter;
use crate::error::DecodeError;
use crate::traits::{ChunkDecoder, DecodedChunk};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::Cursor;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use tracing::{debug, instrument, warn};

/// Consecutive bad packets tolerated before a payload is given up on.
const MAX_CONSECUTIVE_ERRORS: usize = 10;

/// [`ChunkDecoder`] backed by symphonia.
///
/// Stateless: every call opens its own format reader and codec over the
/// payload, so one instance can serve any number of concurrent decodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaChunkDecoder;

impl SymphoniaChunkDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode synchronously on the calling thread.
    #[instrument(skip(payload), fields(bytes = payload.len()), level = "debug")]
    pub fn decode_blocking(sequence: u64, payload: &[u8]) -> Result<DecodedChunk, DecodeError> {
        let sniffed = FormatDetector::sniff(payload);
        let hint = FormatDetector::hint_for(sniffed);

        let source = Box::new(Cursor::new(payload.to_vec())) as Box<dyn MediaSource>;
        let mss = MediaSourceStream::new(source, Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::InvalidContainer(e.to_string()))?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::UnsupportedFormat("No audio track".to_string()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let codec = FormatDetector::detect_codec(codec_params.codec);
        FormatDetector::validate_codec_support(codec)?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

        let mut converter = SampleConverter::new();
        let mut sample_rate = codec_params.sample_rate;
        let mut consecutive_errors = 0;

        loop {
            let packet = match format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    return Err(DecodeError::Codec(
                        "Track list changed inside one chunk".to_string(),
                    ));
                }
                Err(e) => return Err(DecodeError::InvalidContainer(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    consecutive_errors = 0;
                    sample_rate.get_or_insert(decoded.spec().rate);
                    converter.append(&decoded);
                }
                Err(e @ (SymphoniaError::DecodeError(_) | SymphoniaError::IoError(_)))
                    if consecutive_errors + 1 < MAX_CONSECUTIVE_ERRORS =>
                {
                    consecutive_errors += 1;
                    warn!(sequence, "Skipping bad packet: {}", e);
                }
                Err(e) => return Err(DecodeError::Codec(e.to_string())),
            }
        }

        if converter.frames() == 0 {
            return Err(DecodeError::Empty);
        }

        let sample_rate = sample_rate
            .filter(|rate| *rate > 0)
            .ok_or_else(|| DecodeError::UnsupportedFormat("Missing sample rate".to_string()))?;

        let chunk = DecodedChunk::new(sequence, codec, sample_rate, converter.into_planes());
        debug!(
            sequence,
            frames = chunk.frames(),
            channels = chunk.channel_count(),
            sample_rate,
            "Chunk decoded"
        );
        Ok(chunk)
    }
}

#[async_trait]
impl ChunkDecoder for SymphoniaChunkDecoder {
    async fn decode(&self, sequence: u64, payload: Bytes) -> Result<DecodedChunk, DecodeError> {
        tokio::task::spawn_blocking(move || Self::decode_blocking(sequence, &payload))
            .await
            .map_err(|e| DecodeError::TaskFailed(e.to_string()))?
    }
}
