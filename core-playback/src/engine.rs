//! # Stream Engine
//!
//! Drives one attempt at a time from network bytes to audible output.
//!
//! ## Pipeline
//!
//! ```text
//! ByteStream ──▶ FrameDemuxer ──▶ decode tasks (≤ max_in_flight)
//!                                        │ (sequence, result)
//!                                        ▼
//!                                  ChunkSequencer ──▶ PlaybackScheduler ──▶ AudioOutput
//!                                                                              │
//!                     voice ended ◀────────────────────────────────────────────┘
//! ```
//!
//! Each [`start`](StreamEngine::start) creates a new attempt. Before the new
//! attempt's first byte is read, the previous one is cancelled, every voice
//! it scheduled is stopped and its recording is released. Late results of
//! the old pipeline are rejected by the scheduler's ownership check.
//!
//! ## Failure Policy
//!
//! - A chunk that fails to decode is skipped and reported; the stream goes on.
//! - Truncation, oversized frames and zero playable chunks fail the attempt
//!   and stop whatever it scheduled.
//! - Nothing is retried here.
//!
//! ## Refresh
//!
//! [`refresh`](StreamEngine::refresh) reads the clock once and produces an
//! [`EngineFrame`] with progress and visualizer output. Call it once per
//! display frame or let [`spawn_refresh_loop`](StreamEngine::spawn_refresh_loop)
//! do it at the configured rate.

use crate::config::StreamingConfig;
use crate::error::{PlaybackError, Result, TruncationCause};
use crate::finalizer::{AssetHandle, Finalizer};
use crate::framing::{DemuxStats, FrameDemuxer};
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::scheduler::{PlaybackScheduler, PlaybackState};
use crate::sequencer::{ChunkSequencer, DecodeOutcome};
use crate::traits::{AttemptId, AudioOutput, ChunkDecoder, DecodedChunk, VoiceEndedReceiver};
use crate::visualizer::{VisualFrame, Visualizer};
use bridge_traits::http::ByteStream;
use bytes::Bytes;
use core_runtime::events::{CoreEvent, EventBus, StreamEvent};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Canvas size used until [`StreamEngine::set_canvas_size`] is called.
pub const DEFAULT_CANVAS_SIZE: (f32, f32) = (300.0, 60.0);

// ============================================================================
// Public Types
// ============================================================================

/// Everything the display needs for one refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineFrame {
    pub attempt: Option<AttemptId>,
    pub state: PlaybackState,
    pub progress: ProgressSnapshot,
    pub visual: VisualFrame,
}

/// Result of an attempt that played to the end.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub attempt: AttemptId,
    pub asset: AssetHandle,
    /// Chunks scheduled and concatenated.
    pub chunks: usize,
    /// Chunks that failed to decode.
    pub skipped: usize,
    pub demux: DemuxStats,
}

/// Handle to a running attempt.
#[derive(Debug)]
pub struct StreamSession {
    attempt: AttemptId,
    cancel: CancellationToken,
    task: JoinHandle<Result<SessionOutcome>>,
}

impl StreamSession {
    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the attempt to end, fail or be superseded.
    pub async fn wait(self) -> Result<SessionOutcome> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(PlaybackError::Cancelled),
            Err(e) => Err(PlaybackError::Internal(format!("Session task failed: {}", e))),
        }
    }

    /// Abort the pipeline without touching what is already scheduled.
    ///
    /// Prefer [`StreamEngine::stop`], which also silences the output.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// Engine
// ============================================================================

struct ActiveSession {
    attempt: AttemptId,
    cancel: CancellationToken,
}

struct EngineShared {
    session: Option<ActiveSession>,
    finalizer: Finalizer,
    finalized_attempt: Option<AttemptId>,
    progress: ProgressTracker,
    visualizer: Visualizer,
    canvas: (f32, f32),
    last_position_ms: Option<u64>,
}

/// Streaming playback engine. One per output device.
pub struct StreamEngine {
    config: StreamingConfig,
    decoder: Arc<dyn ChunkDecoder>,
    scheduler: Arc<PlaybackScheduler>,
    events: EventBus,
    shared: Arc<Mutex<EngineShared>>,
    next_attempt: AtomicU64,
    frames: watch::Sender<EngineFrame>,
}

impl StreamEngine {
    /// Create an engine playing through `output`.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        config: StreamingConfig,
        decoder: Arc<dyn ChunkDecoder>,
        output: Arc<dyn AudioOutput>,
        events: EventBus,
    ) -> Result<Self> {
        config.validate().map_err(PlaybackError::InvalidConfig)?;

        let visualizer = Visualizer::new(config.visualizer.clone());
        let idle = EngineFrame {
            attempt: None,
            state: PlaybackState::Idle,
            progress: ProgressSnapshot::idle(),
            visual: visualizer.idle_frame(DEFAULT_CANVAS_SIZE.0, DEFAULT_CANVAS_SIZE.1),
        };
        let (frames, _) = watch::channel(idle);

        Ok(Self {
            scheduler: Arc::new(PlaybackScheduler::new(output, config.lead_in)),
            config,
            decoder,
            events,
            shared: Arc::new(Mutex::new(EngineShared {
                session: None,
                finalizer: Finalizer::new(),
                finalized_attempt: None,
                progress: ProgressTracker::new(),
                visualizer,
                canvas: DEFAULT_CANVAS_SIZE,
                last_position_ms: None,
            })),
            next_attempt: AtomicU64::new(0),
            frames,
        })
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<PlaybackScheduler> {
        &self.scheduler
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> PlaybackState {
        self.scheduler.state()
    }

    /// Attempt owning the timeline, if any.
    pub fn current_attempt(&self) -> Option<AttemptId> {
        self.scheduler.owner()
    }

    /// The live recording of the last finished attempt.
    pub fn current_asset(&self) -> Option<AssetHandle> {
        self.shared.lock().finalizer.current().cloned()
    }

    /// Size of the visualizer canvas in display units.
    pub fn set_canvas_size(&self, width: f32, height: f32) {
        self.shared.lock().canvas = (width, height);
    }

    /// Receiver for every frame produced by [`refresh`](Self::refresh).
    pub fn frames(&self) -> watch::Receiver<EngineFrame> {
        self.frames.subscribe()
    }

    /// Start a new attempt reading `body`.
    ///
    /// The previous attempt is torn down synchronously before this returns.
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the output refuses to stop or resume.
    #[instrument(skip(self, body))]
    pub fn start(&self, body: ByteStream) -> Result<StreamSession> {
        let attempt = AttemptId(self.next_attempt.fetch_add(1, Ordering::Relaxed) + 1);
        let cancel = CancellationToken::new();
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();

        {
            let mut shared = self.shared.lock();
            self.teardown(&mut shared, true)?;
            self.scheduler.claim(attempt, ended_tx)?;
            shared.session = Some(ActiveSession {
                attempt,
                cancel: cancel.clone(),
            });
        }

        info!(%attempt, "Stream attempt started");
        self.emit(StreamEvent::Started { attempt: attempt.0 });

        let pipeline = Pipeline {
            attempt,
            cancel: cancel.clone(),
            config: self.config.clone(),
            decoder: Arc::clone(&self.decoder),
            scheduler: Arc::clone(&self.scheduler),
            events: self.events.clone(),
            shared: Arc::clone(&self.shared),
        };
        let task = tokio::spawn(pipeline.run_session(body, ended_rx));

        Ok(StreamSession {
            attempt,
            cancel,
            task,
        })
    }

    /// Stop the current attempt or replay. The last recording stays available.
    #[instrument(skip(self))]
    pub fn stop(&self) -> Result<()> {
        let mut shared = self.shared.lock();
        self.teardown(&mut shared, false)
    }

    /// Pause playback. Returns `false` if nothing was playing.
    pub fn pause(&self) -> Result<bool> {
        let paused = self.scheduler.pause()?;
        if paused {
            let timeline = self.scheduler.snapshot();
            if let Some(attempt) = timeline.attempt {
                let position = ProgressTracker::current_position(&timeline);
                debug!(%attempt, position, "Playback paused");
                self.emit(StreamEvent::Paused {
                    attempt: attempt.0,
                    position_ms: to_ms(position),
                });
            }
        }
        Ok(paused)
    }

    /// Resume playback. Returns `false` if it was not paused.
    pub fn resume(&self) -> Result<bool> {
        let resumed = self.scheduler.resume()?;
        if resumed {
            let timeline = self.scheduler.snapshot();
            if let Some(attempt) = timeline.attempt {
                let position = ProgressTracker::current_position(&timeline);
                debug!(%attempt, position, "Playback resumed");
                self.emit(StreamEvent::Resumed {
                    attempt: attempt.0,
                    position_ms: to_ms(position),
                });
            }
        }
        Ok(resumed)
    }

    /// Play the last finished recording again from the start.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::SchedulingConflict`] if there is no live recording.
    #[instrument(skip(self))]
    pub fn replay(&self) -> Result<AttemptId> {
        let mut shared = self.shared.lock();

        let (attempt, handle) = match (shared.finalized_attempt, shared.finalizer.current()) {
            (Some(attempt), Some(handle)) => (attempt, handle.clone()),
            _ => {
                return Err(PlaybackError::SchedulingConflict(
                    "No finished recording to replay".to_string(),
                ))
            }
        };
        let recording = handle.recording()?;

        if let Some(previous) = shared.session.take() {
            previous.cancel.cancel();
        }

        let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
        let placed = self.scheduler.replay(attempt, recording, ended_tx)?;
        let cancel = CancellationToken::new();
        shared.session = Some(ActiveSession {
            attempt,
            cancel: cancel.clone(),
        });
        shared.last_position_ms = None;
        drop(shared);

        let scheduler = Arc::clone(&self.scheduler);
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    voice = ended_rx.recv() => match voice {
                        Some(voice) => {
                            if scheduler.voice_ended(voice) == Some(PlaybackState::Ended) {
                                let _ = events.emit(CoreEvent::Stream(StreamEvent::Ended {
                                    attempt: attempt.0,
                                    duration_ms: to_ms(placed.duration),
                                }));
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(attempt)
    }

    /// Produce the frame for this display refresh.
    pub fn refresh(&self) -> EngineFrame {
        let timeline = self.scheduler.snapshot();

        let (progress, visual, position_event) = {
            let mut shared = self.shared.lock();
            let progress = shared.progress.snapshot(&timeline);
            let (width, height) = shared.canvas;
            let visual = shared
                .visualizer
                .render(&**self.scheduler.output(), width, height);

            let mut position_event = None;
            if let Some(attempt) = timeline.attempt {
                let position_ms = to_ms(progress.elapsed);
                if timeline.state.is_active()
                    && !timeline.paused
                    && shared.last_position_ms != Some(position_ms)
                {
                    shared.last_position_ms = Some(position_ms);
                    position_event = Some(StreamEvent::PositionUpdated {
                        attempt: attempt.0,
                        position_ms,
                        duration_ms: to_ms(progress.total),
                    });
                }
            }
            (progress, visual, position_event)
        };

        if let Some(event) = position_event {
            self.emit(event);
        }

        let frame = EngineFrame {
            attempt: timeline.attempt,
            state: timeline.state,
            progress,
            visual,
        };
        self.frames.send_replace(frame.clone());
        frame
    }

    /// Call [`refresh`](Self::refresh) at `refresh_rate_hz` until `cancel` fires.
    pub fn spawn_refresh_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.config.refresh_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        engine.refresh();
                    }
                }
            }
            debug!("Refresh loop stopped");
        })
    }

    /// Cancel the active session and silence the output. Called with the
    /// shared lock held so a finishing pipeline cannot finalize in between.
    fn teardown(&self, shared: &mut EngineShared, release_asset: bool) -> Result<()> {
        if let Some(session) = shared.session.take() {
            session.cancel.cancel();
            debug!(attempt = %session.attempt, "Session cancelled");
        }

        let was_active = self.scheduler.state().is_active();
        if let Some(previous) = self.scheduler.stop()? {
            if was_active {
                info!(attempt = %previous, "Playback stopped");
                self.emit(StreamEvent::Stopped {
                    attempt: previous.0,
                });
            }
        }

        if release_asset {
            shared.finalizer.release();
            shared.finalized_attempt = None;
        }
        shared.progress.reset();
        shared.visualizer.reset();
        shared.last_position_ms = None;
        Ok(())
    }

    fn emit(&self, event: StreamEvent) {
        let _ = self.events.emit(CoreEvent::Stream(event));
    }
}

impl std::fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// One attempt's read/decode/schedule loop.
struct Pipeline {
    attempt: AttemptId,
    cancel: CancellationToken,
    config: StreamingConfig,
    decoder: Arc<dyn ChunkDecoder>,
    scheduler: Arc<PlaybackScheduler>,
    events: EventBus,
    shared: Arc<Mutex<EngineShared>>,
}

/// Running totals of one attempt.
#[derive(Default)]
struct Progress {
    chunks: Vec<Arc<DecodedChunk>>,
    skipped: usize,
}

impl Pipeline {
    async fn run_session(
        self,
        body: ByteStream,
        ended_rx: VoiceEndedReceiver,
    ) -> Result<SessionOutcome> {
        match self.run(body, ended_rx).await {
            Ok(outcome) => Ok(outcome),
            Err(_) if self.cancel.is_cancelled() => {
                debug!(attempt = %self.attempt, "Pipeline cancelled");
                Err(PlaybackError::Cancelled)
            }
            Err(err) => {
                error!(attempt = %self.attempt, "Stream failed: {}", err);
                {
                    let mut shared = self.shared.lock();
                    if !self.cancel.is_cancelled() {
                        shared.session = None;
                        if self.scheduler.owner() == Some(self.attempt) {
                            if let Err(stop_err) = self.scheduler.stop() {
                                warn!("Failed to stop playback after error: {}", stop_err);
                            }
                        }
                    }
                }
                self.emit(StreamEvent::Error {
                    attempt: Some(self.attempt.0),
                    message: err.to_string(),
                    recoverable: err.is_transient(),
                });
                Err(err)
            }
        }
    }

    #[instrument(skip_all, fields(attempt = %self.attempt))]
    async fn run(&self, mut body: ByteStream, mut ended_rx: VoiceEndedReceiver) -> Result<SessionOutcome> {
        let read_timeout = self.config.read_timeout;
        let mut demuxer = Some(FrameDemuxer::new(self.config.max_frame_bytes));
        let mut demux_stats = DemuxStats::default();
        let mut sequencer = ChunkSequencer::new();
        let mut decodes: JoinSet<(u64, DecodeOutcome)> = JoinSet::new();
        let mut queued: VecDeque<(u64, Bytes)> = VecDeque::new();
        let mut emitted = 0u64;
        let mut progress = Progress::default();
        let mut draining = false;

        let deadline = tokio::time::sleep(read_timeout);
        tokio::pin!(deadline);

        loop {
            // every emitted payload has been decoded and placed or skipped
            if demuxer.is_none() && sequencer.is_drained(emitted) && !draining {
                if progress.chunks.is_empty() {
                    return Err(PlaybackError::EmptyStream {
                        skipped: progress.skipped,
                    });
                }
                draining = true;
                if self.scheduler.begin_draining(self.attempt)? == PlaybackState::Ended {
                    break;
                }
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Err(PlaybackError::Cancelled),

                Some(joined) = decodes.join_next(), if !decodes.is_empty() => {
                    let (index, outcome) = joined
                        .map_err(|e| PlaybackError::Internal(format!("Decode task failed: {}", e)))?;
                    for (index, outcome) in sequencer.insert(index, outcome) {
                        self.place(index, outcome, &mut progress)?;
                    }
                    self.refill(&mut decodes, &mut queued);
                }

                Some(voice) = ended_rx.recv() => {
                    if self.scheduler.voice_ended(voice) == Some(PlaybackState::Ended) {
                        break;
                    }
                }

                item = body.next(), if demuxer.is_some() => {
                    deadline.as_mut().reset(Instant::now() + read_timeout);
                    match item {
                        Some(Ok(bytes)) => {
                            let payloads = match demuxer.as_mut() {
                                Some(demuxer) => demuxer.feed(&bytes)?,
                                None => Vec::new(),
                            };
                            for payload in payloads {
                                queued.push_back((emitted, payload));
                                emitted += 1;
                            }
                            self.refill(&mut decodes, &mut queued);
                        }
                        Some(Err(e)) => {
                            close(&mut demuxer, TruncationCause::Transport(e.to_string()))?;
                        }
                        None => {
                            demux_stats = close(&mut demuxer, TruncationCause::EndOfStream)?;
                            info!(
                                frames = demux_stats.frames,
                                keep_alives = demux_stats.keep_alives,
                                bytes = demux_stats.bytes_received,
                                "Byte stream ended"
                            );
                        }
                    }
                }

                _ = &mut deadline, if demuxer.is_some() => {
                    close(&mut demuxer, TruncationCause::TimedOut(read_timeout))?;
                }
            }
        }

        self.finish(progress, demux_stats)
    }

    /// Start queued decodes up to the concurrency limit.
    fn refill(&self, decodes: &mut JoinSet<(u64, DecodeOutcome)>, queued: &mut VecDeque<(u64, Bytes)>) {
        while decodes.len() < self.config.max_in_flight_decodes {
            let Some((index, payload)) = queued.pop_front() else {
                break;
            };
            let decoder = Arc::clone(&self.decoder);
            decodes.spawn(async move { (index, decoder.decode(index, payload).await) });
        }
    }

    /// Schedule or skip one in-order decode result.
    fn place(&self, index: u64, outcome: DecodeOutcome, progress: &mut Progress) -> Result<()> {
        let chunk = match outcome {
            Ok(chunk) => chunk,
            Err(err) => {
                progress.skipped += 1;
                warn!(sequence = index, "Skipping chunk that failed to decode: {}", err);
                self.emit(StreamEvent::ChunkSkipped {
                    attempt: self.attempt.0,
                    sequence: index,
                    reason: err.to_string(),
                });
                return Ok(());
            }
        };

        if let Some(first) = progress.chunks.first() {
            if first.format() != chunk.format() {
                return Err(PlaybackError::FormatMismatch {
                    sequence: index,
                    expected: first.format().to_string(),
                    found: chunk.format().to_string(),
                });
            }
        }

        let chunk = Arc::new(chunk);
        let placed = self.scheduler.schedule(self.attempt, Arc::clone(&chunk))?;
        progress.chunks.push(chunk);

        self.emit(StreamEvent::ChunkScheduled {
            attempt: self.attempt.0,
            sequence: placed.sequence,
            start_at_ms: to_ms(placed.start_at),
            duration_ms: to_ms(placed.duration),
        });
        Ok(())
    }

    /// Finalize the recording unless a newer attempt took over meanwhile.
    fn finish(&self, progress: Progress, demux: DemuxStats) -> Result<SessionOutcome> {
        let asset = {
            let mut shared = self.shared.lock();
            if self.cancel.is_cancelled() {
                return Err(PlaybackError::Cancelled);
            }
            let asset = shared.finalizer.finalize(&progress.chunks)?;
            shared.finalized_attempt = Some(self.attempt);
            shared.progress.fix_total(asset.duration_seconds());
            asset
        };

        let duration_ms = to_ms(asset.duration_seconds());
        self.emit(StreamEvent::Ended {
            attempt: self.attempt.0,
            duration_ms,
        });
        if let Ok(wav) = asset.wav_bytes() {
            self.emit(StreamEvent::Finalized {
                attempt: self.attempt.0,
                asset_id: asset.id().to_string(),
                duration_ms,
                size_bytes: wav.len() as u64,
            });
        }

        info!(
            attempt = %self.attempt,
            chunks = progress.chunks.len(),
            skipped = progress.skipped,
            duration_ms,
            "Stream complete"
        );
        Ok(SessionOutcome {
            attempt: self.attempt,
            asset,
            chunks: progress.chunks.len(),
            skipped: progress.skipped,
            demux,
        })
    }

    fn emit(&self, event: StreamEvent) {
        let _ = self.events.emit(CoreEvent::Stream(event));
    }
}

/// Close the demuxer because of `cause`.
fn close(demuxer: &mut Option<FrameDemuxer>, cause: TruncationCause) -> Result<DemuxStats> {
    match demuxer.take() {
        Some(demuxer) => demuxer.finish_with(cause),
        None => Err(PlaybackError::Internal("Byte stream closed twice".to_string())),
    }
}

fn to_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}
