//! # Spectrum Visualizer
//!
//! Renders spectrum bars from whatever the output is currently playing.
//!
//! The visualizer only reads the output's analyser tap. It never looks at
//! chunks or frames, so live streaming and replay of a finished recording
//! look the same. While nothing is audible it draws a static idle pattern
//! and does not sample the output at all.
//!
//! Analysis mirrors a browser analyser node: Hann-windowed FFT of the newest
//! `fft_size` samples, per-bin exponential smoothing, then decibels mapped
//! linearly onto `0..=255`.

use crate::config::VisualizerConfig;
use crate::traits::AudioOutput;
use serde::{Deserialize, Serialize};
use spectrum_analyzer::scaling::divide_by_N;
use spectrum_analyzer::windows::hann_window;
use spectrum_analyzer::{samples_fft_to_spectrum, FrequencyLimit};
use tracing::{trace, warn};

/// Bars never shrink below this height while audio is playing.
const MIN_BAR_HEIGHT: f32 = 3.0;
/// Share of the canvas height a full-scale bar reaches.
const BAR_HEADROOM: f32 = 0.8;
const IDLE_ALPHA: f32 = 0.15;

/// One bar of a frame. Bars are drawn centered on the canvas midline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Left edge.
    pub x: f32,
    /// Full height, split evenly above and below the midline.
    pub height: f32,
    /// Opacity of the upper half.
    pub alpha: f32,
    /// Opacity of the lower, reflected half.
    pub reflection_alpha: f32,
    /// Opacity of the glow around loud bars.
    pub glow: Option<f32>,
}

/// Everything needed to draw one refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualFrame {
    pub width: f32,
    pub height: f32,
    pub bar_width: f32,
    pub bars: Vec<Bar>,
    /// `true` for the idle pattern.
    pub idle: bool,
}

/// Stateful spectrum renderer. Holds the smoothing history between frames.
#[derive(Debug)]
pub struct Visualizer {
    config: VisualizerConfig,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    /// Set after the first failed analysis so the warning is logged once.
    analysis_failed: bool,
}

impl Visualizer {
    pub fn new(config: VisualizerConfig) -> Self {
        Self {
            window: vec![0.0; config.fft_size],
            smoothed: vec![0.0; config.bin_count()],
            analysis_failed: false,
            config,
        }
    }

    pub fn config(&self) -> &VisualizerConfig {
        &self.config
    }

    /// Produce the frame for this refresh.
    pub fn render(&mut self, output: &dyn AudioOutput, width: f32, height: f32) -> VisualFrame {
        if !output.is_audible() {
            return self.idle_frame(width, height);
        }

        let bins = match self.sample(output) {
            Some(bins) => bins,
            None => return self.idle_frame(width, height),
        };
        self.bars_from_bins(&bins, width, height)
    }

    /// Read the tap and return byte-scaled magnitudes, one per bin.
    fn sample(&mut self, output: &dyn AudioOutput) -> Option<Vec<u8>> {
        let filled = output.analyser_snapshot(&mut self.window);
        self.window[filled..].fill(0.0);

        let windowed = hann_window(&self.window);
        let spectrum = match samples_fft_to_spectrum(
            &windowed,
            output.sample_rate(),
            FrequencyLimit::All,
            Some(&divide_by_N),
        ) {
            Ok(spectrum) => spectrum,
            Err(e) => {
                if self.analysis_failed {
                    trace!("Spectrum analysis failed: {:?}", e);
                } else {
                    warn!(
                        fft_size = self.window.len(),
                        "Spectrum analysis failed, showing the idle pattern: {:?}", e
                    );
                    self.analysis_failed = true;
                }
                return None;
            }
        };

        let tau = self.config.smoothing;
        let range = self.config.max_decibels - self.config.min_decibels;
        let bytes = spectrum
            .data()
            .iter()
            .zip(self.smoothed.iter_mut())
            .map(|((_, magnitude), smoothed)| {
                *smoothed = tau * *smoothed + (1.0 - tau) * magnitude.val();
                let decibels = if *smoothed > 0.0 {
                    20.0 * smoothed.log10()
                } else {
                    f32::NEG_INFINITY
                };
                let scaled = 255.0 * (decibels - self.config.min_decibels) / range;
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect();
        Some(bytes)
    }

    /// Lay out spectrum bars for byte-scaled bins.
    pub fn bars_from_bins(&self, bins: &[u8], width: f32, height: f32) -> VisualFrame {
        let count = self.config.bar_count;
        let step = (bins.len() / count).max(1);

        let bars = (0..count)
            .map(|i| {
                let value = bins.get(i * step).copied().unwrap_or(0);
                let intensity = f32::from(value) / 255.0;
                let alpha = 0.2 + intensity * 0.8;
                Bar {
                    x: self.bar_x(i, width),
                    height: (intensity * height * BAR_HEADROOM).max(MIN_BAR_HEIGHT),
                    alpha,
                    reflection_alpha: alpha * 0.3,
                    glow: (intensity > 0.5).then(|| (intensity - 0.5) * 0.4),
                }
            })
            .collect();

        VisualFrame {
            width,
            height,
            bar_width: self.config.bar_width,
            bars,
            idle: false,
        }
    }

    /// Gentle double-sine pattern shown while nothing plays.
    pub fn idle_frame(&self, width: f32, height: f32) -> VisualFrame {
        let bars = (0..self.config.bar_count)
            .map(|i| {
                let i_f = i as f32;
                let amplitude = 4.0 + (i_f * 0.15).sin() * 6.0 + (i_f * 0.08 + 1.0).sin() * 4.0;
                Bar {
                    x: self.bar_x(i, width),
                    height: amplitude * 2.0,
                    alpha: IDLE_ALPHA,
                    reflection_alpha: IDLE_ALPHA,
                    glow: None,
                }
            })
            .collect();

        VisualFrame {
            width,
            height,
            bar_width: self.config.bar_width,
            bars,
            idle: true,
        }
    }

    /// Drop the smoothing history, e.g. after a stop.
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
    }

    fn bar_x(&self, index: usize, width: f32) -> f32 {
        let count = self.config.bar_count as f32;
        let gap = (width - count * self.config.bar_width) / (count - 1.0);
        index as f32 * (self.config.bar_width + gap)
    }
}
