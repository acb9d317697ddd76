//! # Event Bus System
//!
//! Event-driven notifications for the speech streaming core, built on
//! `tokio::sync::broadcast`. The playback engine and the synthesis service
//! publish typed events; UIs and tests subscribe without holding references
//! to either.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ Stream engine  ├────────>│           ├────────────>│ UI / label │
//! └────────────────┘         │ EventBus  │             └────────────┘
//! ┌────────────────┐  emit   │           │  subscribe  ┌────────────┐
//! │ Speech service ├────────>│           ├────────────>│ Log panel  │
//! └────────────────┘         └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, StreamEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut stream = EventStream::new(bus.subscribe())
//!     .filter(|event| matches!(event, CoreEvent::Stream(_)));
//!
//! bus.emit(CoreEvent::Stream(StreamEvent::Stopped { attempt: 1 })).ok();
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "Playback stopped");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Position
//!   updates are frequent, so slow subscribers should expect this and carry on.
//! - **`RecvError::Closed`**: all senders were dropped; treat as shutdown.
//!
//! Timestamps and positions are carried as whole milliseconds so events stay
//! `Eq` and serialize without float noise.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Sized for a few seconds of position updates at display refresh rate.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Playback pipeline events for one stream attempt
    Stream(StreamEvent),
    /// Requests made to the synthesis service
    Synthesis(SynthesisEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Stream(e) => e.description(),
            CoreEvent::Synthesis(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Stream(StreamEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Synthesis(SynthesisEvent::Rejected { .. }) => EventSeverity::Error,
            CoreEvent::Stream(StreamEvent::ChunkSkipped { .. }) => EventSeverity::Warning,
            CoreEvent::Stream(StreamEvent::Ended { .. }) => EventSeverity::Info,
            CoreEvent::Stream(StreamEvent::Finalized { .. }) => EventSeverity::Info,
            CoreEvent::Synthesis(SynthesisEvent::Requested { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Stream attempt the event belongs to, when it has one.
    pub fn attempt(&self) -> Option<u64> {
        match self {
            CoreEvent::Stream(e) => e.attempt(),
            CoreEvent::Synthesis(SynthesisEvent::StreamOpened { attempt, .. }) => Some(*attempt),
            CoreEvent::Synthesis(_) => None,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Stream Events
// ============================================================================

/// Events emitted while a chunked audio stream is played.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum StreamEvent {
    /// A new attempt took over the playback timeline.
    Started { attempt: u64 },
    /// A decoded chunk was placed on the timeline.
    ChunkScheduled {
        attempt: u64,
        /// Zero-based position of the chunk in the stream.
        sequence: u64,
        /// Output-clock time the chunk starts at (milliseconds).
        start_at_ms: u64,
        /// Chunk duration (milliseconds).
        duration_ms: u64,
    },
    /// A chunk failed to decode and was left out of playback.
    ChunkSkipped {
        attempt: u64,
        sequence: u64,
        reason: String,
    },
    /// Periodic progress report.
    PositionUpdated {
        attempt: u64,
        position_ms: u64,
        /// Total scheduled duration so far (milliseconds).
        duration_ms: u64,
    },
    Paused { attempt: u64, position_ms: u64 },
    Resumed { attempt: u64, position_ms: u64 },
    /// Playback was cut short by the user or by a newer attempt.
    Stopped { attempt: u64 },
    /// The last scheduled chunk finished playing.
    Ended { attempt: u64, duration_ms: u64 },
    /// A downloadable recording of the stream is ready.
    Finalized {
        attempt: u64,
        asset_id: String,
        duration_ms: u64,
        size_bytes: u64,
    },
    /// The stream failed.
    Error {
        attempt: Option<u64>,
        message: String,
        /// Whether retrying the request may succeed.
        recoverable: bool,
    },
}

impl StreamEvent {
    fn description(&self) -> &str {
        match self {
            StreamEvent::Started { .. } => "Stream started",
            StreamEvent::ChunkScheduled { .. } => "Chunk scheduled",
            StreamEvent::ChunkSkipped { .. } => "Chunk skipped",
            StreamEvent::PositionUpdated { .. } => "Playback position updated",
            StreamEvent::Paused { .. } => "Playback paused",
            StreamEvent::Resumed { .. } => "Playback resumed",
            StreamEvent::Stopped { .. } => "Playback stopped",
            StreamEvent::Ended { .. } => "Playback ended",
            StreamEvent::Finalized { .. } => "Recording ready",
            StreamEvent::Error { .. } => "Stream error",
        }
    }

    fn attempt(&self) -> Option<u64> {
        match self {
            StreamEvent::Started { attempt }
            | StreamEvent::ChunkScheduled { attempt, .. }
            | StreamEvent::ChunkSkipped { attempt, .. }
            | StreamEvent::PositionUpdated { attempt, .. }
            | StreamEvent::Paused { attempt, .. }
            | StreamEvent::Resumed { attempt, .. }
            | StreamEvent::Stopped { attempt }
            | StreamEvent::Ended { attempt, .. }
            | StreamEvent::Finalized { attempt, .. } => Some(*attempt),
            StreamEvent::Error { attempt, .. } => *attempt,
        }
    }
}

// ============================================================================
// Synthesis Events
// ============================================================================

/// Events about requests to the speech-synthesis service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SynthesisEvent {
    /// A synthesis request was sent.
    Requested {
        /// Character count of the input text. The text itself is not carried.
        text_chars: u64,
        language: String,
    },
    /// The service accepted the request and started streaming audio.
    StreamOpened { attempt: u64, status: u16 },
    /// The service refused the request or could not be reached.
    Rejected {
        status: Option<u16>,
        message: String,
    },
}

impl SynthesisEvent {
    fn description(&self) -> &str {
        match self {
            SynthesisEvent::Requested { .. } => "Synthesis requested",
            SynthesisEvent::StreamOpened { .. } => "Synthesis stream opened",
            SynthesisEvent::Rejected { .. } => "Synthesis rejected",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Clone it to get another producer; call [`subscribe`](Self::subscribe) for
/// another consumer. Slow consumers get `RecvError::Lagged` instead of
/// blocking publishers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when nobody is listening. Publishers usually ignore that error.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new receiver for all future events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let attempt_7 = EventStream::new(bus.subscribe())
///     .filter(|event| event.attempt() == Some(7));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without waiting.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
