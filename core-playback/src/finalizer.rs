//! # Finalizer
//!
//! Concatenates the decoded chunks of a finished stream into one standalone
//! recording.
//!
//! The recording is a 32-bit IEEE float WAV written with `hound`, so any
//! player can open it and decoding it yields exactly the concatenated
//! samples. The same samples are kept in memory for replay through the
//! scheduler.
//!
//! At most one recording handle is live per [`Finalizer`]: finalizing again
//! releases the previous handle first. Clones of a released handle refuse
//! further access.

use crate::error::{PlaybackError, Result};
use crate::traits::{AudioCodec, AudioFormat, DecodedChunk};
use bytes::Bytes;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Identifies one finalized recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetId(pub Uuid);

impl AssetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A finished stream as one recording.
#[derive(Debug)]
pub struct FinalizedAsset {
    pub id: AssetId,
    /// Standalone WAV file.
    pub wav: Bytes,
    /// Concatenated samples, ready for replay.
    pub recording: Arc<DecodedChunk>,
    pub format: AudioFormat,
    /// Number of chunks concatenated.
    pub chunk_count: usize,
}

impl FinalizedAsset {
    pub fn duration_seconds(&self) -> f64 {
        self.recording.duration_seconds()
    }
}

/// Shared access to a [`FinalizedAsset`] that can be revoked.
#[derive(Debug, Clone)]
pub struct AssetHandle {
    asset: Arc<FinalizedAsset>,
    live: Arc<AtomicBool>,
}

impl AssetHandle {
    fn new(asset: FinalizedAsset) -> Self {
        Self {
            asset: Arc::new(asset),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> AssetId {
        self.asset.id
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Revoke this handle and every clone of it. Idempotent.
    pub fn release(&self) {
        if self.live.swap(false, Ordering::AcqRel) {
            debug!(asset = %self.asset.id, "Recording released");
        }
    }

    /// The recording, while the handle is live.
    pub fn asset(&self) -> Result<&FinalizedAsset> {
        if self.is_live() {
            Ok(&self.asset)
        } else {
            Err(PlaybackError::AssetReleased(self.asset.id.to_string()))
        }
    }

    pub fn wav_bytes(&self) -> Result<Bytes> {
        Ok(self.asset()?.wav.clone())
    }

    pub fn recording(&self) -> Result<Arc<DecodedChunk>> {
        Ok(Arc::clone(&self.asset()?.recording))
    }

    pub fn duration_seconds(&self) -> f64 {
        self.asset.duration_seconds()
    }

    /// Save the WAV file to `path`.
    pub async fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let wav = self.wav_bytes()?;
        tokio::fs::write(path.as_ref(), &wav).await?;
        info!(asset = %self.asset.id, path = %path.as_ref().display(), bytes = wav.len(), "Recording saved");
        Ok(())
    }
}

/// Produces recordings and owns the single live handle.
#[derive(Debug, Default)]
pub struct Finalizer {
    current: Option<AssetHandle>,
}

impl Finalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate `chunks` in order into a new recording.
    ///
    /// The previous handle is released before anything else happens, even
    /// if this call fails.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::EmptyStream`] if `chunks` is empty
    /// - [`PlaybackError::FormatMismatch`] if chunks disagree on sample rate
    ///   or channel count
    /// - [`PlaybackError::Encode`] if the WAV writer fails
    #[instrument(skip(self, chunks), fields(chunks = chunks.len()))]
    pub fn finalize(&mut self, chunks: &[Arc<DecodedChunk>]) -> Result<AssetHandle> {
        self.release();

        let first = chunks
            .first()
            .ok_or(PlaybackError::EmptyStream { skipped: 0 })?;
        let format = first.format();

        for chunk in &chunks[1..] {
            if chunk.format() != format {
                return Err(PlaybackError::FormatMismatch {
                    sequence: chunk.sequence,
                    expected: format.to_string(),
                    found: chunk.format().to_string(),
                });
            }
        }

        let channels = usize::from(format.channels);
        let mut planes: Vec<Vec<f32>> = (0..channels)
            .map(|_| Vec::with_capacity(chunks.iter().map(|chunk| chunk.frames()).sum()))
            .collect();
        for chunk in chunks {
            for (plane, source) in planes.iter_mut().zip(&chunk.planes) {
                plane.extend_from_slice(source);
            }
        }

        let codec = if chunks.iter().all(|chunk| chunk.codec == first.codec) {
            first.codec
        } else {
            AudioCodec::Unknown
        };
        let recording = DecodedChunk::new(0, codec, format.sample_rate, planes);
        let wav = encode_wav(&recording)?;

        let asset = FinalizedAsset {
            id: AssetId::new(),
            wav,
            recording: Arc::new(recording),
            format,
            chunk_count: chunks.len(),
        };
        info!(
            asset = %asset.id,
            duration = asset.duration_seconds(),
            bytes = asset.wav.len(),
            "Stream finalized"
        );

        let handle = AssetHandle::new(asset);
        self.current = Some(handle.clone());
        Ok(handle)
    }

    /// The live handle, if any.
    pub fn current(&self) -> Option<&AssetHandle> {
        self.current.as_ref().filter(|handle| handle.is_live())
    }

    /// Release the live handle, if any.
    pub fn release(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.release();
        }
    }
}

/// Write planar samples as an interleaved 32-bit float WAV.
pub fn encode_wav(chunk: &DecodedChunk) -> Result<Bytes> {
    let spec = hound::WavSpec {
        channels: chunk.channel_count(),
        sample_rate: chunk.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + chunk.frames() * chunk.planes.len() * 4));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| PlaybackError::Encode(e.to_string()))?;
        for frame in 0..chunk.frames() {
            for plane in &chunk.planes {
                writer
                    .write_sample(plane[frame])
                    .map_err(|e| PlaybackError::Encode(e.to_string()))?;
            }
        }
        writer
            .finalize()
            .map_err(|e| PlaybackError::Encode(e.to_string()))?;
    }

    Ok(Bytes::from(cursor.into_inner()))
}
