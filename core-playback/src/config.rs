//! # Streaming Configuration
//!
//! Configuration types for the chunked stream engine and its visualizer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stream engine configuration.
///
/// Controls scheduling lead-in, network read deadlines, decode concurrency,
/// the refresh cadence and visualizer layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Delay between the first chunk being scheduled and it becoming audible.
    ///
    /// Gives the output a moment to start without clipping the first
    /// samples. Default: 100 ms.
    #[serde(default = "default_lead_in")]
    pub lead_in: Duration,

    /// Longest wait for the next network read before the stream is
    /// considered truncated.
    ///
    /// Default: 30 seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout: Duration,

    /// Maximum number of chunks decoding at the same time.
    ///
    /// Default: 4.
    #[serde(default = "default_max_in_flight_decodes")]
    pub max_in_flight_decodes: usize,

    /// Upper bound on a single frame's payload. A length prefix above it
    /// fails the stream instead of buffering forever.
    ///
    /// Default: 16 MiB.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// How often progress and the visualizer are refreshed.
    ///
    /// Default: 60 Hz.
    #[serde(default = "default_refresh_rate_hz")]
    pub refresh_rate_hz: u32,

    #[serde(default)]
    pub visualizer: VisualizerConfig,

    /// Suggested file name when the finished recording is downloaded.
    #[serde(default = "default_download_file_name")]
    pub download_file_name: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            lead_in: default_lead_in(),
            read_timeout: default_read_timeout(),
            max_in_flight_decodes: default_max_in_flight_decodes(),
            max_frame_bytes: default_max_frame_bytes(),
            refresh_rate_hz: default_refresh_rate_hz(),
            visualizer: VisualizerConfig::default(),
            download_file_name: default_download_file_name(),
        }
    }
}

impl StreamingConfig {
    /// Create a configuration tuned for the shortest time to first sound.
    ///
    /// - Shorter lead-in (20 ms)
    /// - More decodes in flight
    /// - Tighter read deadline
    pub fn low_latency() -> Self {
        Self {
            lead_in: Duration::from_millis(20),
            read_timeout: Duration::from_secs(10),
            max_in_flight_decodes: 8,
            ..Default::default()
        }
    }

    /// Interval between refresh ticks.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.refresh_rate_hz.max(1)))
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.lead_in > Duration::from_secs(5) {
            return Err("lead_in must not exceed 5 seconds".to_string());
        }

        if self.read_timeout.is_zero() {
            return Err("read_timeout must be > 0".to_string());
        }

        if self.max_in_flight_decodes == 0 {
            return Err("max_in_flight_decodes must be > 0".to_string());
        }

        if self.max_frame_bytes == 0 {
            return Err("max_frame_bytes must be > 0".to_string());
        }

        if !(1..=240).contains(&self.refresh_rate_hz) {
            return Err("refresh_rate_hz must be between 1 and 240".to_string());
        }

        if self.download_file_name.trim().is_empty() {
            return Err("download_file_name must not be empty".to_string());
        }

        self.visualizer.validate()
    }
}

/// Spectrum bar visualizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizerConfig {
    /// Number of bars drawn across the canvas.
    #[serde(default = "default_bar_count")]
    pub bar_count: usize,

    /// Width of one bar in canvas units.
    #[serde(default = "default_bar_width")]
    pub bar_width: f32,

    /// Samples per analysis window. Must be a power of two.
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,

    /// Weight of the previous frame's magnitude (0.0 = no smoothing).
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,

    /// Level mapped to byte value 0.
    #[serde(default = "default_min_decibels")]
    pub min_decibels: f32,

    /// Level mapped to byte value 255.
    #[serde(default = "default_max_decibels")]
    pub max_decibels: f32,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            bar_count: default_bar_count(),
            bar_width: default_bar_width(),
            fft_size: default_fft_size(),
            smoothing: default_smoothing(),
            min_decibels: default_min_decibels(),
            max_decibels: default_max_decibels(),
        }
    }
}

pub const MIN_FFT_SIZE: usize = 32;

/// Largest window `spectrum_analyzer::samples_fft_to_spectrum` accepts.
pub const MAX_FFT_SIZE: usize = 16384;

impl VisualizerConfig {
    /// Number of frequency bins produced per analysis window.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bar_count < 2 {
            return Err("bar_count must be at least 2".to_string());
        }

        if !(self.bar_width > 0.0) {
            return Err("bar_width must be > 0".to_string());
        }

        if !self.fft_size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&self.fft_size) {
            return Err(format!(
                "fft_size must be a power of two between {} and {}",
                MIN_FFT_SIZE, MAX_FFT_SIZE
            ));
        }

        if !(0.0..1.0).contains(&self.smoothing) {
            return Err("smoothing must be in [0.0, 1.0)".to_string());
        }

        if self.min_decibels >= self.max_decibels {
            return Err("min_decibels must be below max_decibels".to_string());
        }

        Ok(())
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_lead_in() -> Duration {
    Duration::from_millis(100)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_in_flight_decodes() -> usize {
    4
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024 // 16 MiB
}

fn default_refresh_rate_hz() -> u32 {
    60
}

fn default_download_file_name() -> String {
    "speech.wav".to_string()
}

fn default_bar_count() -> usize {
    60
}

fn default_bar_width() -> f32 {
    3.0
}

fn default_fft_size() -> usize {
    256
}

fn default_smoothing() -> f32 {
    0.8
}

fn default_min_decibels() -> f32 {
    -100.0
}

fn default_max_decibels() -> f32 {
    -30.0
}
