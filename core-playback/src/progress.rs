//! # Progress Tracker
//!
//! Turns a timeline snapshot into elapsed/total figures for display.

use crate::scheduler::{PlaybackState, TimelineSnapshot};
use serde::{Deserialize, Serialize};

/// Playback position at one refresh tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Seconds played, clamped to `[0, total]`.
    pub elapsed: f64,
    /// Seconds scheduled so far, or the recording length once ended.
    pub total: f64,
    /// `elapsed / total`, 0.0 when nothing is scheduled.
    pub fraction: f64,
    pub elapsed_label: String,
    pub total_label: String,
    /// `true` while the total may still grow.
    pub provisional: bool,
    pub paused: bool,
}

impl ProgressSnapshot {
    /// Progress of an idle engine.
    pub fn idle() -> Self {
        Self::new(0.0, 0.0, false, false)
    }

    fn new(elapsed: f64, total: f64, provisional: bool, paused: bool) -> Self {
        let fraction = if total > 0.0 { elapsed / total } else { 0.0 };
        Self {
            elapsed,
            total,
            fraction,
            elapsed_label: format_clock(elapsed),
            total_label: format_clock(total),
            provisional,
            paused,
        }
    }
}

/// Computes positions from timeline snapshots.
///
/// Each snapshot carries exactly one clock reading, so elapsed and total in
/// a [`ProgressSnapshot`] always agree with each other.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    fixed_total: Option<f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the total to the finalized recording's duration.
    pub fn fix_total(&mut self, seconds: f64) {
        self.fixed_total = Some(seconds);
    }

    /// Forget the pinned total, e.g. when a new attempt starts.
    pub fn reset(&mut self) {
        self.fixed_total = None;
    }

    /// `now - clock_origin`, clamped to `[0, total_scheduled]`.
    pub fn current_position(timeline: &TimelineSnapshot) -> f64 {
        match timeline.clock_origin {
            Some(origin) => (timeline.now - origin).clamp(0.0, timeline.total_scheduled.max(0.0)),
            None => 0.0,
        }
    }

    /// Total duration: provisional until the timeline ends.
    pub fn total_duration(&self, timeline: &TimelineSnapshot) -> f64 {
        match (timeline.state, self.fixed_total) {
            (PlaybackState::Ended, Some(total)) => total,
            _ => timeline.total_scheduled,
        }
    }

    pub fn snapshot(&self, timeline: &TimelineSnapshot) -> ProgressSnapshot {
        if timeline.state == PlaybackState::Idle {
            return ProgressSnapshot::idle();
        }

        let total = self.total_duration(timeline);
        let elapsed = Self::current_position(timeline).min(total);
        ProgressSnapshot::new(
            elapsed,
            total,
            timeline.state == PlaybackState::Streaming,
            timeline.paused,
        )
    }
}

/// Format seconds as `m:ss`. Zero, negative and non-finite values read `0:00`.
///
/// ```rust
/// use core_playback::format_clock;
///
/// assert_eq!(format_clock(75.9), "1:15");
/// assert_eq!(format_clock(f64::NAN), "0:00");
/// ```
pub fn format_clock(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0:00".to_string();
    }
    let whole = seconds.floor() as u64;
    format!("{}:{:02}", whole / 60, whole % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::AttemptId;

    fn timeline(state: PlaybackState, now: f64, origin: Option<f64>, total: f64) -> TimelineSnapshot {
        TimelineSnapshot {
            attempt: Some(AttemptId(1)),
            state,
            paused: false,
            now,
            clock_origin: origin,
            total_scheduled: total,
            voices: 1,
        }
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0.0), "0:00");
        assert_eq!(format_clock(-3.0), "0:00");
        assert_eq!(format_clock(f64::INFINITY), "0:00");
        assert_eq!(format_clock(9.99), "0:09");
        assert_eq!(format_clock(60.0), "1:00");
        assert_eq!(format_clock(3599.5), "59:59");
        assert_eq!(format_clock(3600.0), "60:00");
    }

    #[test]
    fn test_position_is_clamped() {
        let before_origin = timeline(PlaybackState::Streaming, 0.05, Some(0.1), 2.0);
        assert_eq!(ProgressTracker::current_position(&before_origin), 0.0);

        let underrun = timeline(PlaybackState::Streaming, 5.0, Some(0.1), 2.0);
        assert_eq!(ProgressTracker::current_position(&underrun), 2.0);

        let no_origin = timeline(PlaybackState::Streaming, 5.0, None, 0.0);
        assert_eq!(ProgressTracker::current_position(&no_origin), 0.0);
    }

    #[test]
    fn test_total_fixed_only_after_end() {
        let mut tracker = ProgressTracker::new();
        tracker.fix_total(3.0);

        let streaming = timeline(PlaybackState::Streaming, 1.0, Some(0.0), 2.0);
        let snapshot = tracker.snapshot(&streaming);
        assert_eq!(snapshot.total, 2.0);
        assert!(snapshot.provisional);
        assert_eq!(snapshot.fraction, 0.5);

        let ended = timeline(PlaybackState::Ended, 4.0, Some(0.0), 3.0);
        let snapshot = tracker.snapshot(&ended);
        assert_eq!(snapshot.total, 3.0);
        assert!(!snapshot.provisional);
        assert_eq!(snapshot.elapsed_label, "0:03");
    }

    #[test]
    fn test_idle_snapshot() {
        let tracker = ProgressTracker::new();
        let idle = TimelineSnapshot {
            attempt: None,
            state: PlaybackState::Idle,
            paused: false,
            now: 12.0,
            clock_origin: None,
            total_scheduled: 0.0,
            voices: 0,
        };
        assert_eq!(tracker.snapshot(&idle), ProgressSnapshot::idle());
        assert_eq!(ProgressSnapshot::idle().total_label, "0:00");
    }
}
