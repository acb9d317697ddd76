//! Wall-clock timing of one synthesis, from request to last chunk.

use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct GenerationTimer {
    started: Instant,
}

impl GenerationTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stop timing and log the result.
    pub fn finish(self, succeeded: bool) -> Duration {
        let elapsed = self.elapsed();
        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            succeeded,
            "Generation time: {}",
            format_generation_time(elapsed)
        );
        elapsed
    }
}

/// `12.3s` under a minute, `2m 5.0s` from there on.
pub fn format_generation_time(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs_f64();
    if seconds < 60.0 {
        return format!("{:.1}s", seconds);
    }
    let minutes = (seconds / 60.0).floor();
    format!("{}m {:.1}s", minutes as u64, seconds - minutes * 60.0)
}
