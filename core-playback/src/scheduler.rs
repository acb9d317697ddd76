//! # Playback Scheduler
//!
//! Places decoded chunks back to back on the output clock.
//!
//! ## State Machine
//!
//! ```text
//!            claim            begin_draining        last voice ended
//!   Idle ───────────▶ Streaming ───────────▶ Draining ───────────▶ Ended
//!    ▲                    │                      │                   │
//!    └──────── stop ──────┴──────────────────────┴───────────────────┘
//! ```
//!
//! `paused` is orthogonal and only meaningful in `Streaming` or `Draining`.
//! Pausing suspends the output clock; start times already handed to the
//! output stay valid because the clock they refer to stops with them.
//!
//! ## Timeline
//!
//! The first chunk of an attempt starts at `clock_origin = now + lead_in`.
//! Every chunk starts exactly at the cursor, which then advances by the
//! chunk's duration, so concatenation is gapless no matter when chunks
//! arrive. A chunk that arrives after the cursor has already passed is still
//! placed at the cursor; the output plays only the part of it that has not
//! yet gone by, so a burst of late chunks never overlaps.

use crate::error::{PlaybackError, Result};
use crate::traits::{AttemptId, AudioOutput, DecodedChunk, ScheduledVoice, VoiceEndedSender, VoiceId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No timeline.
    Idle,
    /// Chunks are still arriving.
    Streaming,
    /// The stream ended; scheduled voices are playing out.
    Draining,
    /// The last voice finished.
    Ended,
}

impl PlaybackState {
    /// `true` while voices may still be sounding.
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackState::Streaming | PlaybackState::Draining)
    }
}

/// Where one chunk landed on the timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub voice: VoiceId,
    pub sequence: u64,
    /// Output-clock start time in seconds.
    pub start_at: f64,
    pub duration: f64,
}

/// Consistent view of the timeline read under one clock sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineSnapshot {
    pub attempt: Option<AttemptId>,
    pub state: PlaybackState,
    pub paused: bool,
    /// Output-clock time the snapshot was taken at.
    pub now: f64,
    pub clock_origin: Option<f64>,
    /// Sum of every scheduled chunk's duration, in seconds.
    pub total_scheduled: f64,
    pub voices: usize,
}

#[derive(Debug)]
struct TimelineVoice {
    id: VoiceId,
    chunk: Arc<DecodedChunk>,
    start_at: f64,
    finished: bool,
}

#[derive(Debug)]
struct Timeline {
    attempt: AttemptId,
    on_ended: VoiceEndedSender,
    clock_origin: Option<f64>,
    cursor: f64,
    total_scheduled: f64,
    voices: Vec<TimelineVoice>,
}

impl Timeline {
    fn new(attempt: AttemptId, on_ended: VoiceEndedSender) -> Self {
        Self {
            attempt,
            on_ended,
            clock_origin: None,
            cursor: 0.0,
            total_scheduled: 0.0,
            voices: Vec::new(),
        }
    }

    fn all_finished(&self) -> bool {
        self.voices.iter().all(|voice| voice.finished)
    }
}

#[derive(Debug)]
struct SchedulerInner {
    state: PlaybackState,
    paused: bool,
    timeline: Option<Timeline>,
    next_voice: u64,
}

/// Gapless chunk scheduler shared by every attempt of one engine.
pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    lead_in: f64,
    inner: Mutex<SchedulerInner>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>, lead_in: Duration) -> Self {
        Self {
            output,
            lead_in: lead_in.as_secs_f64(),
            inner: Mutex::new(SchedulerInner {
                state: PlaybackState::Idle,
                paused: false,
                timeline: None,
                next_voice: 0,
            }),
        }
    }

    pub fn output(&self) -> &Arc<dyn AudioOutput> {
        &self.output
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// Attempt that owns the current timeline.
    pub fn owner(&self) -> Option<AttemptId> {
        self.inner.lock().timeline.as_ref().map(|timeline| timeline.attempt)
    }

    /// Bind the scheduler to `attempt` and enter `Streaming`.
    ///
    /// Voice completions of this attempt are reported on `on_ended`.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::SchedulingConflict`] while another attempt's
    /// timeline is still active. Callers stop the old attempt first.
    #[instrument(skip(self, on_ended))]
    pub fn claim(&self, attempt: AttemptId, on_ended: VoiceEndedSender) -> Result<()> {
        let mut inner = self.inner.lock();

        if let Some(timeline) = &inner.timeline {
            if inner.state.is_active() {
                return Err(PlaybackError::SchedulingConflict(format!(
                    "{} cannot claim the timeline while {} is active",
                    attempt, timeline.attempt
                )));
            }
        }

        inner.timeline = Some(Timeline::new(attempt, on_ended));
        inner.state = PlaybackState::Streaming;
        inner.paused = false;
        debug!("Timeline claimed");
        Ok(())
    }

    /// Place the next chunk of `attempt` at the cursor.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::SchedulingConflict`] if `attempt` does not own a
    /// streaming timeline.
    pub fn schedule(&self, attempt: AttemptId, chunk: Arc<DecodedChunk>) -> Result<ScheduledChunk> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.state != PlaybackState::Streaming {
            return Err(PlaybackError::SchedulingConflict(format!(
                "{} scheduled chunk {} in state {:?}",
                attempt, chunk.sequence, inner.state
            )));
        }
        let timeline = owned_timeline(&mut inner.timeline, attempt)?;

        let now = self.output.current_time();
        if timeline.clock_origin.is_none() {
            timeline.clock_origin = Some(now + self.lead_in);
            timeline.cursor = now + self.lead_in;
        }

        let start_at = timeline.cursor;
        if start_at < now {
            warn!(
                sequence = chunk.sequence,
                late_by_ms = ((now - start_at) * 1000.0) as u64,
                "Chunk arrived after its slot started; playback underran"
            );
        }

        let id = VoiceId(inner.next_voice);
        inner.next_voice += 1;

        let duration = chunk.duration_seconds();
        let voice = ScheduledVoice {
            id,
            buffer: Arc::clone(&chunk),
            start_at,
        };
        self.output.schedule(voice, timeline.on_ended.clone())?;

        timeline.cursor += duration;
        timeline.total_scheduled += duration;
        timeline.voices.push(TimelineVoice {
            id,
            chunk: Arc::clone(&chunk),
            start_at,
            finished: false,
        });

        debug!(
            sequence = chunk.sequence,
            start_at,
            duration,
            cursor = timeline.cursor,
            "Chunk scheduled"
        );

        Ok(ScheduledChunk {
            voice: id,
            sequence: chunk.sequence,
            start_at,
            duration,
        })
    }

    /// Note that the byte stream ended.
    ///
    /// Returns the new state: `Draining`, or `Ended` if every voice has
    /// already played out.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::SchedulingConflict`] if `attempt` is not the owner,
    /// the timeline is not streaming, or nothing was scheduled.
    pub fn begin_draining(&self, attempt: AttemptId) -> Result<PlaybackState> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.state != PlaybackState::Streaming {
            return Err(PlaybackError::SchedulingConflict(format!(
                "{} cannot drain in state {:?}",
                attempt, inner.state
            )));
        }
        let timeline = owned_timeline(&mut inner.timeline, attempt)?;
        if timeline.voices.is_empty() {
            return Err(PlaybackError::SchedulingConflict(format!(
                "{} has nothing to drain",
                attempt
            )));
        }

        inner.state = if timeline.all_finished() {
            PlaybackState::Ended
        } else {
            PlaybackState::Draining
        };
        info!(%attempt, state = ?inner.state, total = timeline.total_scheduled, "Stream drained");
        Ok(inner.state)
    }

    /// Record that `voice` played to completion.
    ///
    /// Returns `Some(Ended)` when this was the last voice of a draining
    /// timeline. Voices of other attempts are ignored.
    pub fn voice_ended(&self, voice: VoiceId) -> Option<PlaybackState> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let timeline = inner.timeline.as_mut()?;

        let entry = timeline.voices.iter_mut().find(|entry| entry.id == voice)?;
        entry.finished = true;

        if inner.state == PlaybackState::Draining && timeline.all_finished() {
            inner.state = PlaybackState::Ended;
            // the per-chunk path is done; only the totals stay for progress
            timeline.voices.clear();
            info!(attempt = %timeline.attempt, "Playback ended");
            return Some(PlaybackState::Ended);
        }
        None
    }

    /// Suspend the output clock. Returns `false` if there was nothing to pause.
    pub fn pause(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        if !inner.state.is_active() || inner.paused {
            return Ok(false);
        }
        self.output.suspend()?;
        inner.paused = true;
        Ok(true)
    }

    /// Resume the output clock. Returns `false` if it was not paused.
    pub fn resume(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        if !inner.paused {
            return Ok(false);
        }
        self.output.resume()?;
        inner.paused = false;
        Ok(true)
    }

    /// Halt every unfinished voice, discard the timeline and return to `Idle`.
    ///
    /// Returns the attempt that owned the discarded timeline.
    #[instrument(skip(self))]
    pub fn stop(&self) -> Result<Option<AttemptId>> {
        let mut inner = self.inner.lock();

        let owner = inner.timeline.take().map(|timeline| {
            for voice in timeline.voices.iter().filter(|voice| !voice.finished) {
                self.output.stop(voice.id);
            }
            timeline.attempt
        });

        if inner.paused {
            self.output.resume()?;
            inner.paused = false;
        }
        inner.state = PlaybackState::Idle;

        if let Some(attempt) = owner {
            debug!(%attempt, "Timeline discarded");
        }
        Ok(owner)
    }

    /// Play a finalized recording as one voice on a fresh timeline.
    ///
    /// Allowed once `attempt` has ended, while a previous replay of it is
    /// still playing, or after a stop left no timeline. The timeline goes
    /// straight to `Draining`.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::SchedulingConflict`] while chunks are still being
    /// scheduled, or if another attempt owns the timeline.
    #[instrument(skip(self, recording, on_ended))]
    pub fn replay(
        &self,
        attempt: AttemptId,
        recording: Arc<DecodedChunk>,
        on_ended: VoiceEndedSender,
    ) -> Result<ScheduledChunk> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        match inner.state {
            PlaybackState::Idle => {}
            PlaybackState::Ended | PlaybackState::Draining => {
                let previous = owned_timeline(&mut inner.timeline, attempt)?;
                for voice in previous.voices.iter().filter(|voice| !voice.finished) {
                    self.output.stop(voice.id);
                }
            }
            PlaybackState::Streaming => {
                return Err(PlaybackError::SchedulingConflict(format!(
                    "{} cannot replay while streaming",
                    attempt
                )));
            }
        }
        if inner.paused {
            self.output.resume()?;
            inner.paused = false;
        }

        let start_at = self.output.current_time() + self.lead_in;
        let duration = recording.duration_seconds();
        let id = VoiceId(inner.next_voice);
        inner.next_voice += 1;

        self.output.schedule(
            ScheduledVoice {
                id,
                buffer: Arc::clone(&recording),
                start_at,
            },
            on_ended.clone(),
        )?;

        let mut timeline = Timeline::new(attempt, on_ended);
        timeline.clock_origin = Some(start_at);
        timeline.cursor = start_at + duration;
        timeline.total_scheduled = duration;
        timeline.voices.push(TimelineVoice {
            id,
            chunk: Arc::clone(&recording),
            start_at,
            finished: false,
        });
        inner.timeline = Some(timeline);
        inner.state = PlaybackState::Draining;

        info!(duration, "Replaying finalized recording");
        Ok(ScheduledChunk {
            voice: id,
            sequence: recording.sequence,
            start_at,
            duration,
        })
    }

    /// Read the timeline with a single clock sample.
    pub fn snapshot(&self) -> TimelineSnapshot {
        let inner = self.inner.lock();
        let now = self.output.current_time();
        match &inner.timeline {
            Some(timeline) => TimelineSnapshot {
                attempt: Some(timeline.attempt),
                state: inner.state,
                paused: inner.paused,
                now,
                clock_origin: timeline.clock_origin,
                total_scheduled: timeline.total_scheduled,
                voices: timeline.voices.len(),
            },
            None => TimelineSnapshot {
                attempt: None,
                state: inner.state,
                paused: inner.paused,
                now,
                clock_origin: None,
                total_scheduled: 0.0,
                voices: 0,
            },
        }
    }

    /// Chunks on the current timeline, in start order, with start times.
    pub fn scheduled(&self) -> Vec<(Arc<DecodedChunk>, f64)> {
        self.inner
            .lock()
            .timeline
            .as_ref()
            .map(|timeline| {
                timeline
                    .voices
                    .iter()
                    .map(|voice| (Arc::clone(&voice.chunk), voice.start_at))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PlaybackScheduler")
            .field("lead_in", &self.lead_in)
            .field("state", &inner.state)
            .field("paused", &inner.paused)
            .finish()
    }
}

fn owned_timeline(timeline: &mut Option<Timeline>, attempt: AttemptId) -> Result<&mut Timeline> {
    match timeline.as_ref().map(|timeline| timeline.attempt) {
        Some(owner) if owner == attempt => timeline.as_mut().ok_or_else(|| {
            PlaybackError::SchedulingConflict(format!("{} has no timeline", attempt))
        }),
        Some(owner) => Err(PlaybackError::SchedulingConflict(format!(
            "{} does not own the timeline of {}",
            attempt, owner
        ))),
        None => Err(PlaybackError::SchedulingConflict(format!(
            "{} has no timeline",
            attempt
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::VirtualAudioOutput;
    use crate::traits::AudioCodec;
    use tokio::sync::mpsc;

    const RATE: u32 = 1000;

    fn chunk(sequence: u64, frames: usize) -> Arc<DecodedChunk> {
        Arc::new(DecodedChunk::new(
            sequence,
            AudioCodec::Wav,
            RATE,
            vec![vec![0.5; frames]],
        ))
    }

    fn setup() -> (Arc<VirtualAudioOutput>, PlaybackScheduler) {
        let output = Arc::new(VirtualAudioOutput::new(RATE));
        let scheduler = PlaybackScheduler::new(output.clone(), Duration::from_millis(100));
        (output, scheduler)
    }

    #[test]
    fn test_chunks_are_placed_back_to_back() {
        let (output, scheduler) = setup();
        let (tx, _rx) = mpsc::unbounded_channel();
        scheduler.claim(AttemptId(1), tx).unwrap();

        let first = scheduler.schedule(AttemptId(1), chunk(0, 250)).unwrap();
        output.advance(Duration::from_millis(300));
        let second = scheduler.schedule(AttemptId(1), chunk(1, 500)).unwrap();
        let third = scheduler.schedule(AttemptId(1), chunk(2, 125)).unwrap();

        assert!((first.start_at - 0.1).abs() < 1e-9);
        assert!((second.start_at - 0.35).abs() < 1e-9);
        assert!((third.start_at - 0.85).abs() < 1e-9);
        assert!((scheduler.snapshot().total_scheduled - 0.875).abs() < 1e-9);
    }

    #[test]
    fn test_late_burst_keeps_cumulative_timeline() {
        let output = Arc::new(VirtualAudioOutput::new(RATE).with_capture());
        let scheduler = PlaybackScheduler::new(output.clone(), Duration::from_millis(100));
        let (tx, mut rx) = mpsc::unbounded_channel();
        scheduler.claim(AttemptId(1), tx).unwrap();
        let tone = |sequence: u64, value: f32| {
            Arc::new(DecodedChunk::new(sequence, AudioCodec::Wav, RATE, vec![vec![value; 100]]))
        };

        scheduler.schedule(AttemptId(1), tone(0, 0.1)).unwrap();
        // the network stalls until 50 ms into chunk 1's slot
        output.advance(Duration::from_millis(250));
        let second = scheduler.schedule(AttemptId(1), tone(1, 0.2)).unwrap();
        let third = scheduler.schedule(AttemptId(1), tone(2, 0.3)).unwrap();
        scheduler.begin_draining(AttemptId(1)).unwrap();
        output.advance(Duration::from_millis(300));

        assert!((second.start_at - 0.2).abs() < 1e-9);
        assert!((third.start_at - 0.3).abs() < 1e-9);

        let captured = output.captured().unwrap();
        assert!(captured.iter().all(|sample| *sample <= 0.3 + 1e-6));
        assert_eq!(captured[299], 0.2);
        assert_eq!(captured[300], 0.3);

        let heard = output.heard_voices();
        assert!(heard[1].last_heard < heard[2].first_heard);

        let mut state = None;
        while let Ok(voice) = rx.try_recv() {
            state = scheduler.voice_ended(voice).or(state);
        }
        assert_eq!(state, Some(PlaybackState::Ended));
        assert!((scheduler.snapshot().total_scheduled - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_claim_conflict_while_active() {
        let (_output, scheduler) = setup();
        let (tx, _rx) = mpsc::unbounded_channel();
        scheduler.claim(AttemptId(1), tx.clone()).unwrap();

        let result = scheduler.claim(AttemptId(2), tx.clone());
        assert!(matches!(result, Err(PlaybackError::SchedulingConflict(_))));

        assert_eq!(scheduler.stop().unwrap(), Some(AttemptId(1)));
        assert!(scheduler.claim(AttemptId(2), tx).is_ok());
    }

    #[test]
    fn test_foreign_attempt_is_rejected() {
        let (_output, scheduler) = setup();
        let (tx, _rx) = mpsc::unbounded_channel();
        scheduler.claim(AttemptId(2), tx).unwrap();

        let result = scheduler.schedule(AttemptId(1), chunk(0, 10));
        assert!(matches!(result, Err(PlaybackError::SchedulingConflict(_))));
        assert_eq!(scheduler.snapshot().voices, 0);
    }

    #[test]
    fn test_drain_then_end() {
        let (output, scheduler) = setup();
        let (tx, mut rx) = mpsc::unbounded_channel();
        scheduler.claim(AttemptId(1), tx).unwrap();
        scheduler.schedule(AttemptId(1), chunk(0, 100)).unwrap();
        scheduler.schedule(AttemptId(1), chunk(1, 100)).unwrap();

        assert_eq!(scheduler.begin_draining(AttemptId(1)).unwrap(), PlaybackState::Draining);

        output.advance(Duration::from_millis(250));
        let first = rx.try_recv().unwrap();
        assert_eq!(scheduler.voice_ended(first), None);

        output.advance(Duration::from_millis(100));
        let second = rx.try_recv().unwrap();
        assert_eq!(scheduler.voice_ended(second), Some(PlaybackState::Ended));
        assert_eq!(scheduler.state(), PlaybackState::Ended);
    }

    #[test]
    fn test_drain_with_nothing_scheduled_fails() {
        let (_output, scheduler) = setup();
        let (tx, _rx) = mpsc::unbounded_channel();
        scheduler.claim(AttemptId(1), tx).unwrap();
        assert!(scheduler.begin_draining(AttemptId(1)).is_err());
    }

    #[test]
    fn test_pause_freezes_clock_without_rescheduling() {
        let (output, scheduler) = setup();
        let (tx, _rx) = mpsc::unbounded_channel();
        scheduler.claim(AttemptId(1), tx).unwrap();
        let placed = scheduler.schedule(AttemptId(1), chunk(0, 1000)).unwrap();

        output.advance(Duration::from_millis(200));
        assert!(scheduler.pause().unwrap());
        assert!(!scheduler.pause().unwrap());

        let frozen = output.current_time();
        output.advance(Duration::from_millis(500));
        assert_eq!(output.current_time(), frozen);

        assert!(scheduler.resume().unwrap());
        assert_eq!(scheduler.scheduled()[0].1, placed.start_at);
    }

    #[test]
    fn test_stop_halts_unfinished_voices() {
        let (output, scheduler) = setup();
        let (tx, mut rx) = mpsc::unbounded_channel();
        scheduler.claim(AttemptId(1), tx).unwrap();
        scheduler.schedule(AttemptId(1), chunk(0, 100)).unwrap();
        scheduler.schedule(AttemptId(1), chunk(1, 100)).unwrap();

        output.advance(Duration::from_millis(250));
        let finished = rx.try_recv().unwrap();
        scheduler.voice_ended(finished);
        scheduler.pause().unwrap();

        scheduler.stop().unwrap();
        assert_eq!(scheduler.state(), PlaybackState::Idle);
        assert!(!scheduler.is_paused());
        assert!(!output.is_suspended());

        output.advance(Duration::from_millis(500));
        assert!(rx.try_recv().is_err());
        assert_eq!(output.active_voices(), 0);
    }

    #[test]
    fn test_replay_requires_ended() {
        let (output, scheduler) = setup();
        let (tx, mut rx) = mpsc::unbounded_channel();
        scheduler.claim(AttemptId(1), tx.clone()).unwrap();
        scheduler.schedule(AttemptId(1), chunk(0, 100)).unwrap();

        let recording = chunk(0, 100);
        assert!(scheduler.replay(AttemptId(1), recording.clone(), tx.clone()).is_err());

        scheduler.begin_draining(AttemptId(1)).unwrap();
        output.advance(Duration::from_millis(250));
        scheduler.voice_ended(rx.try_recv().unwrap());

        assert!(scheduler.replay(AttemptId(2), recording.clone(), tx.clone()).is_err());
        let placed = scheduler.replay(AttemptId(1), recording.clone(), tx.clone()).unwrap();
        assert_eq!(scheduler.state(), PlaybackState::Draining);
        assert!((placed.duration - 0.1).abs() < 1e-9);

        output.advance(Duration::from_millis(250));
        assert_eq!(scheduler.voice_ended(rx.try_recv().unwrap()), Some(PlaybackState::Ended));

        scheduler.stop().unwrap();
        assert!(scheduler.replay(AttemptId(1), recording, tx).is_ok());
        assert_eq!(scheduler.owner(), Some(AttemptId(1)));
    }
}
