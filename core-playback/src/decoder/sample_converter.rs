//! # Sample Format Converter
//!
//! Normalizes symphonia's decoded buffers to planar f32.

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::conv::IntoSample;
use symphonia::core::sample::Sample;
use tracing::warn;

/// Accumulates decoded packets into per-channel f32 planes.
///
/// Symphonia hands out buffers in the source's sample format (i16, i24, f32,
/// ...). Every packet is converted with `IntoSample`, so the result is always
/// f32 in [-1.0, 1.0] with one `Vec` per channel.
#[derive(Debug, Default)]
pub struct SampleConverter {
    planes: Vec<Vec<f32>>,
}

impl SampleConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one decoded packet.
    ///
    /// The first packet fixes the channel count. A later packet with a
    /// different layout is ignored with a warning rather than corrupting the
    /// planes.
    pub fn append(&mut self, buffer: &AudioBufferRef<'_>) {
        match buffer {
            AudioBufferRef::F32(buf) => self.append_typed(buf),
            AudioBufferRef::F64(buf) => self.append_typed(buf),
            AudioBufferRef::S32(buf) => self.append_typed(buf),
            AudioBufferRef::S24(buf) => self.append_typed(buf),
            AudioBufferRef::S16(buf) => self.append_typed(buf),
            AudioBufferRef::S8(buf) => self.append_typed(buf),
            AudioBufferRef::U32(buf) => self.append_typed(buf),
            AudioBufferRef::U24(buf) => self.append_typed(buf),
            AudioBufferRef::U16(buf) => self.append_typed(buf),
            AudioBufferRef::U8(buf) => self.append_typed(buf),
        }
    }

    fn append_typed<T>(&mut self, buf: &AudioBuffer<T>)
    where
        T: Sample + IntoSample<f32>,
    {
        let channels = buf.spec().channels.count();
        if self.planes.is_empty() {
            self.planes = vec![Vec::new(); channels];
        } else if self.planes.len() != channels {
            warn!(
                "Dropping packet with {} channels in a {}-channel stream",
                channels,
                self.planes.len()
            );
            return;
        }

        for (index, plane) in self.planes.iter_mut().enumerate() {
            plane.extend(buf.chan(index).iter().map(|sample| (*sample).into_sample()));
        }
    }

    /// Frames accumulated so far.
    pub fn frames(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }

    pub fn into_planes(self) -> Vec<Vec<f32>> {
        self.planes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::audio::{AsAudioBufferRef, Channels, SignalSpec};

    fn stereo_buffer(frames: usize, left: i16, right: i16) -> AudioBuffer<i16> {
        let spec = SignalSpec::new(8000, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        let mut buffer = AudioBuffer::<i16>::new(frames as u64, spec);
        buffer.render_reserved(Some(frames));
        buffer.chan_mut(0).fill(left);
        buffer.chan_mut(1).fill(right);
        buffer
    }

    #[test]
    fn test_appends_planar_f32() {
        let mut converter = SampleConverter::new();
        let first = stereo_buffer(4, i16::MAX, 0);
        let second = stereo_buffer(2, 0, i16::MIN);

        converter.append(&first.as_audio_buffer_ref());
        converter.append(&second.as_audio_buffer_ref());

        assert_eq!(converter.frames(), 6);
        let planes = converter.into_planes();
        assert_eq!(planes.len(), 2);
        assert!((planes[0][0] - 1.0).abs() < 1e-3);
        assert_eq!(planes[0][5], 0.0);
        assert_eq!(planes[1][5], -1.0);
    }
}
