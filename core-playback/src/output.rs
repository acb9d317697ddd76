//! # Virtual Audio Output
//!
//! In-process [`AudioOutput`] with a frame-counting clock.
//!
//! Nothing is sent to a sound device. The clock moves only when
//! [`advance`](VirtualAudioOutput::advance) renders frames, either driven
//! by hand in tests or by [`spawn_clock`](VirtualAudioOutput::spawn_clock)
//! against wall time. Rendering mixes every sounding voice to mono, feeds
//! the analyser tap and reports voices that played to completion.

use crate::error::Result;
use crate::ring_buffer::RingBuffer;
use crate::traits::{AudioOutput, ScheduledVoice, VoiceEndedSender, VoiceId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Samples kept for the analyser tap.
pub const DEFAULT_TAP_CAPACITY: usize = 4096;

/// When a voice was actually heard, in output-clock seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeardVoice {
    pub id: VoiceId,
    pub first_heard: f64,
    pub last_heard: f64,
}

struct ActiveVoice {
    id: VoiceId,
    voice: ScheduledVoice,
    on_ended: VoiceEndedSender,
    /// Frame the voice's first sample belongs on.
    origin_frame: u64,
    /// First frame actually rendered; later than `origin_frame` for a late voice.
    start_frame: u64,
    /// One past the last output frame.
    end_frame: u64,
}

impl ActiveVoice {
    fn sample_at(&self, frame: u64, output_rate: u32) -> f32 {
        let offset = frame - self.origin_frame;
        let index = offset * u64::from(self.voice.buffer.sample_rate) / u64::from(output_rate);
        self.voice.buffer.mono_sample(index as usize)
    }
}

struct OutputState {
    frame: u64,
    /// Sub-frame remainder carried between `advance` calls, in seconds.
    remainder: f64,
    suspended: bool,
    voices: Vec<ActiveVoice>,
    heard: Vec<HeardVoice>,
    capture: Option<Vec<f32>>,
}

/// Virtual output device.
pub struct VirtualAudioOutput {
    sample_rate: u32,
    tap: RingBuffer,
    state: Mutex<OutputState>,
}

impl VirtualAudioOutput {
    /// Create an output rendering at `sample_rate` Hz.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            tap: RingBuffer::new(DEFAULT_TAP_CAPACITY),
            state: Mutex::new(OutputState {
                frame: 0,
                remainder: 0.0,
                suspended: false,
                voices: Vec::new(),
                heard: Vec::new(),
                capture: None,
            }),
        }
    }

    /// Keep every rendered sample for later inspection.
    pub fn with_capture(self) -> Self {
        self.state.lock().capture = Some(Vec::new());
        self
    }

    /// Render `elapsed` worth of frames. Does nothing while suspended.
    pub fn advance(&self, elapsed: Duration) {
        let mut ended = Vec::new();
        {
            let mut state = self.state.lock();
            if state.suspended {
                return;
            }

            let exact = elapsed.as_secs_f64() * f64::from(self.sample_rate) + state.remainder;
            let frames = exact.floor() as u64;
            state.remainder = exact - frames as f64;

            let mut mixed = Vec::with_capacity(frames as usize);
            let first = state.frame;
            for frame in first..first + frames {
                let mut sum = 0.0f32;
                for voice in &state.voices {
                    if (voice.start_frame..voice.end_frame).contains(&frame) {
                        sum += voice.sample_at(frame, self.sample_rate);
                    }
                }
                mixed.push(sum);
            }
            state.frame = first + frames;
            let now_frame = state.frame;

            self.record_heard(&mut state, first, now_frame);
            if let Some(capture) = state.capture.as_mut() {
                capture.extend_from_slice(&mixed);
            }
            self.tap.write(&mixed);

            state.voices.retain(|voice| {
                if voice.end_frame <= now_frame {
                    ended.push((voice.id, voice.on_ended.clone()));
                    false
                } else {
                    true
                }
            });
        }

        for (id, on_ended) in ended {
            trace!(voice = id.0, "Voice ended");
            // receiver gone means the attempt was torn down
            let _ = on_ended.send(id);
        }
    }

    fn record_heard(&self, state: &mut OutputState, from: u64, to: u64) {
        let rate = f64::from(self.sample_rate);
        let spans: Vec<(VoiceId, u64, u64)> = state
            .voices
            .iter()
            .filter_map(|voice| {
                let start = voice.start_frame.max(from);
                let end = voice.end_frame.min(to);
                (start < end).then_some((voice.id, start, end - 1))
            })
            .collect();

        for (id, start, last) in spans {
            match state.heard.iter_mut().find(|heard| heard.id == id) {
                Some(heard) => heard.last_heard = last as f64 / rate,
                None => state.heard.push(HeardVoice {
                    id,
                    first_heard: start as f64 / rate,
                    last_heard: last as f64 / rate,
                }),
            }
        }
    }

    /// Drive the clock from wall time until `cancel` fires.
    pub fn spawn_clock(self: Arc<Self>, tick: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            let mut last = tokio::time::Instant::now();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let now = tokio::time::Instant::now();
                        self.advance(now - last);
                        last = now;
                    }
                }
            }
            debug!("Output clock stopped");
        })
    }

    /// Voices scheduled and not yet finished or stopped.
    pub fn active_voices(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Every voice that has sounded so far, in first-heard order.
    pub fn heard_voices(&self) -> Vec<HeardVoice> {
        self.state.lock().heard.clone()
    }

    /// Rendered samples, if capture is enabled.
    pub fn captured(&self) -> Option<Vec<f32>> {
        self.state.lock().capture.clone()
    }
}

impl AudioOutput for VirtualAudioOutput {
    fn current_time(&self) -> f64 {
        self.state.lock().frame as f64 / f64::from(self.sample_rate)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn schedule(&self, voice: ScheduledVoice, on_ended: VoiceEndedSender) -> Result<()> {
        let mut state = self.state.lock();

        let origin_frame = (voice.start_at * f64::from(self.sample_rate)).round().max(0.0) as u64;
        let length = (voice.buffer.duration_seconds() * f64::from(self.sample_rate)).round() as u64;
        let end_frame = origin_frame + length;
        // a voice whose slot already began keeps its slot: only the unplayed tail sounds
        let start_frame = origin_frame.max(state.frame).min(end_frame);
        if start_frame > origin_frame {
            debug!(
                voice = voice.id.0,
                dropped_frames = start_frame - origin_frame,
                "Voice scheduled after its start; playing the remainder"
            );
        }

        trace!(voice = voice.id.0, start_frame, end_frame, "Voice scheduled");
        state.voices.push(ActiveVoice {
            id: voice.id,
            voice,
            on_ended,
            origin_frame,
            start_frame,
            end_frame,
        });
        Ok(())
    }

    fn stop(&self, id: VoiceId) {
        self.state.lock().voices.retain(|voice| voice.id != id);
    }

    fn suspend(&self) -> Result<()> {
        self.state.lock().suspended = true;
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.state.lock().suspended = false;
        Ok(())
    }

    fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    fn is_audible(&self) -> bool {
        let state = self.state.lock();
        !state.suspended
            && state
                .voices
                .iter()
                .any(|voice| (voice.start_frame..voice.end_frame).contains(&state.frame))
    }

    fn analyser_snapshot(&self, out: &mut [f32]) -> usize {
        self.tap.latest(out)
    }
}

impl std::fmt::Debug for VirtualAudioOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("VirtualAudioOutput")
            .field("sample_rate", &self.sample_rate)
            .field("frame", &state.frame)
            .field("suspended", &state.suspended)
            .field("voices", &state.voices.len())
            .finish()
    }
}
