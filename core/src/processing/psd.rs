use std::collections::HashMap;

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::interface::samples::{PsdPartial, PsdResult, SampleBuffer};
use crate::math::fft::{FftHelper, TransformContext};
use crate::math::stats::StatsHelper;
use crate::math::window::WindowFunction;
use crate::prelude::{SweepError, SweepResult};
use crate::processing::hop_plan::shifted_bin_frequency;

/// Welch options shared by every hop of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralSettings {
    pub window: WindowFunction,
    /// Overlap between consecutive FFT segments, as a fraction of the bin count.
    pub fft_overlap: f64,
    /// Report dB instead of linear power.
    pub log_scale: bool,
    /// Replace the DC bin with the mean of its neighbours.
    pub remove_dc: bool,
    /// Subtract the segment mean before windowing.
    pub detrend: bool,
}

impl Default for SpectralSettings {
    fn default() -> Self {
        Self {
            window: WindowFunction::Hann,
            fft_overlap: 0.5,
            log_scale: true,
            remove_dc: false,
            detrend: false,
        }
    }
}

/// Welch PSD estimator for one bin count and sample rate.
///
/// Periodograms use power-spectrum scaling, `|X|² / (Σw)²`, so a tone centred
/// on a bin reads its own power.
pub struct PsdEstimator {
    bins: usize,
    sample_rate: f64,
    settings: SpectralSettings,
    window: Vec<f32>,
    scale: f64,
    step: usize,
    transform: TransformContext,
}

impl PsdEstimator {
    pub fn new(
        bins: usize,
        sample_rate: f64,
        settings: SpectralSettings,
        transform: TransformContext,
    ) -> SweepResult<Self> {
        if !(0.0..1.0).contains(&settings.fft_overlap) {
            return Err(SweepError::config(format!(
                "FFT overlap must be within [0, 1), got {}",
                settings.fft_overlap
            )));
        }
        if transform.size() != bins {
            return Err(SweepError::Internal(format!(
                "transform planned for {} points, estimator needs {}",
                transform.size(),
                bins
            )));
        }
        let window = settings.window.coefficients(bins);
        let window_sum: f64 = window.iter().map(|&w| w as f64).sum();
        if window_sum <= 0.0 {
            return Err(SweepError::config(format!(
                "{} window of {} points has no energy",
                settings.window, bins
            )));
        }
        let step = ((bins as f64 * (1.0 - settings.fft_overlap)).round() as usize).max(1);

        Ok(Self {
            bins,
            sample_rate,
            settings,
            window,
            scale: 1.0 / (window_sum * window_sum),
            step,
            transform,
        })
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn settings(&self) -> &SpectralSettings {
        &self.settings
    }

    /// Per-worker transform state.
    pub fn fft_helper(&self) -> FftHelper {
        FftHelper::new(self.transform.clone())
    }

    /// Number of Welch segments in `samples` samples.
    pub fn segment_count(&self, samples: usize) -> usize {
        if samples < self.bins {
            0
        } else {
            (samples - self.bins) / self.step + 1
        }
    }

    /// Sums the shifted periodograms of every segment in `buffer`.
    pub fn accumulate(
        &self,
        buffer: &SampleBuffer,
        fft: &mut FftHelper,
        segment: &mut Vec<Complex32>,
    ) -> PsdPartial {
        let n = self.bins;
        let half = n / 2;
        let segments = self.segment_count(buffer.samples.len());
        let mut power_sum = vec![0.0f64; n];

        for index in 0..segments {
            let start = index * self.step;
            segment.clear();
            segment.extend_from_slice(&buffer.samples[start..start + n]);

            if self.settings.detrend {
                let mean = StatsHelper::mean(segment.as_slice());
                segment.iter_mut().for_each(|s| *s -= mean);
            }
            for (sample, &w) in segment.iter_mut().zip(&self.window) {
                *sample *= w;
            }
            fft.forward(segment);

            for (shifted, sum) in power_sum.iter_mut().enumerate() {
                *sum += segment[(shifted + n - half) % n].norm_sqr() as f64;
            }
        }

        PsdPartial {
            hop_index: buffer.hop_index,
            center_frequency: buffer.center_frequency,
            part: buffer.part,
            parts: buffer.parts,
            capture_start: buffer.capture_start,
            sample_count: buffer.samples.len(),
            power_sum,
            segments,
            magnitude_trace: if buffer.part == 0 {
                buffer.samples.iter().take(n).map(|s| s.norm()).collect()
            } else {
                Vec::new()
            },
        }
    }

    /// Averages a complete hop and converts it to the output scale.
    pub fn finalize(&self, partial: PsdPartial) -> PsdResult {
        let n = self.bins;
        let bin_width = self.sample_rate / n as f64;
        let norm = if partial.segments > 0 {
            self.scale / partial.segments as f64
        } else {
            0.0
        };
        let mut power: Vec<f64> = partial.power_sum.iter().map(|p| p * norm).collect();

        if self.settings.remove_dc && n >= 3 {
            let dc = n / 2;
            power[dc] = (power[dc - 1] + power[dc + 1]) / 2.0;
        }
        if self.settings.log_scale {
            power.iter_mut().for_each(|p| *p = StatsHelper::power_to_db(*p));
        }

        let bin_frequencies = (0..n)
            .map(|bin| shifted_bin_frequency(partial.center_frequency, bin_width, n, bin))
            .collect();

        PsdResult {
            hop_index: partial.hop_index,
            bin_frequencies,
            power_values: power,
            capture_start: partial.capture_start,
            duration: partial.sample_count as f64 / self.sample_rate,
            sample_count: partial.sample_count,
            log_scale: self.settings.log_scale,
            magnitude_trace: partial.magnitude_trace,
        }
    }
}

/// Merges the partial accumulations of multi-buffer hops.
pub struct HopCollector<'a> {
    estimator: &'a PsdEstimator,
    pending: HashMap<usize, (PsdPartial, usize)>,
}

impl<'a> HopCollector<'a> {
    pub fn new(estimator: &'a PsdEstimator) -> Self {
        Self {
            estimator,
            pending: HashMap::new(),
        }
    }

    /// Returns the finished hop once its last buffer arrives, in any order.
    pub fn absorb(&mut self, partial: PsdPartial) -> Option<PsdResult> {
        let hop_index = partial.hop_index;
        let parts = partial.parts.max(1);
        let (merged, seen) = match self.pending.remove(&hop_index) {
            Some((mut merged, seen)) => {
                for (sum, value) in merged.power_sum.iter_mut().zip(&partial.power_sum) {
                    *sum += value;
                }
                merged.segments += partial.segments;
                merged.sample_count += partial.sample_count;
                merged.capture_start = merged.capture_start.min(partial.capture_start);
                if merged.magnitude_trace.is_empty() {
                    merged.magnitude_trace = partial.magnitude_trace;
                }
                (merged, seen + 1)
            }
            None => (partial, 1),
        };

        if seen >= parts {
            Some(self.estimator.finalize(merged))
        } else {
            self.pending.insert(hop_index, (merged, seen));
            None
        }
    }

    /// Hops still waiting for buffers.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
