use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::interface::samples::PsdResult;
use crate::prelude::{SweepError, SweepResult};
use crate::processing::hop_plan::HopPlan;

/// Capture metadata of one hop that contributed to a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct HopCapture {
    pub start: DateTime<Utc>,
    /// Seconds.
    pub duration: f64,
    pub samples: usize,
    pub magnitude_trace: Vec<f32>,
}

/// One sweep's spectrum on the fixed `low + k * bin_width` grid.
#[derive(Debug, Clone)]
pub struct StitchedSpectrum {
    pub frequencies: Vec<f64>,
    pub powers: Vec<f64>,
    pub bin_width: f64,
    pub log_scale: bool,
    /// Lowest hop index that wrote each bin.
    pub source_hops: Vec<usize>,
    pub captures: BTreeMap<usize, HopCapture>,
}

impl StitchedSpectrum {
    pub fn len(&self) -> usize {
        self.powers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.powers.is_empty()
    }

    /// First and last stitched frequency.
    pub fn span(&self) -> (f64, f64) {
        match (self.frequencies.first(), self.frequencies.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => (0.0, 0.0),
        }
    }

    pub fn capture_for_bin(&self, bin: usize) -> Option<&HopCapture> {
        self.source_hops
            .get(bin)
            .and_then(|hop| self.captures.get(hop))
    }

    /// Sum of the capture durations of every contributing hop, in seconds.
    pub fn total_duration(&self) -> f64 {
        self.captures.values().map(|c| c.duration).sum()
    }

    pub fn total_samples(&self) -> u64 {
        self.captures.values().map(|c| c.samples as u64).sum()
    }
}

/// Assembles per-hop results into one spectrum, addressed by frequency.
///
/// Results may arrive in any order. Bins shared by overlapping hops are
/// averaged in whatever scale the results carry.
pub struct SpectrumStitcher<'a> {
    plan: &'a HopPlan,
    log_scale: bool,
    sums: Vec<f64>,
    counts: Vec<u32>,
    source_hops: Vec<usize>,
    captures: BTreeMap<usize, HopCapture>,
}

impl<'a> SpectrumStitcher<'a> {
    pub fn new(plan: &'a HopPlan, log_scale: bool) -> Self {
        let len = plan.grid_len();
        Self {
            plan,
            log_scale,
            sums: vec![0.0; len],
            counts: vec![0; len],
            source_hops: vec![usize::MAX; len],
            captures: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, result: PsdResult) -> SweepResult<()> {
        if result.power_values.len() != self.plan.bins
            || result.bin_frequencies.len() != self.plan.bins
        {
            return Err(SweepError::Internal(format!(
                "hop {} produced {} bins, plan expects {}",
                result.hop_index,
                result.power_values.len(),
                self.plan.bins
            )));
        }
        if result.log_scale != self.log_scale {
            return Err(SweepError::Internal(format!(
                "hop {} scale does not match the sweep",
                result.hop_index
            )));
        }

        let len = self.sums.len() as i64;
        for bin in self.plan.kept_bins(result.hop_index) {
            let index = self.plan.grid_index(result.bin_frequencies[bin]);
            if index < 0 || index >= len {
                continue;
            }
            let index = index as usize;
            self.sums[index] += result.power_values[bin];
            self.counts[index] += 1;
            self.source_hops[index] = self.source_hops[index].min(result.hop_index);
        }
        self.captures.insert(
            result.hop_index,
            HopCapture {
                start: result.capture_start,
                duration: result.duration,
                samples: result.sample_count,
                magnitude_trace: result.magnitude_trace,
            },
        );
        Ok(())
    }

    /// Number of hops inserted so far.
    pub fn hops_inserted(&self) -> usize {
        self.captures.len()
    }

    pub fn finish(self) -> SweepResult<StitchedSpectrum> {
        if let Some(missing) = self.counts.iter().position(|&c| c == 0) {
            return Err(SweepError::Internal(format!(
                "stitched bin {} ({:.0} Hz) was not covered by any hop",
                missing,
                self.plan.low + missing as f64 * self.plan.bin_width
            )));
        }
        let frequencies = (0..self.sums.len())
            .map(|k| self.plan.low + k as f64 * self.plan.bin_width)
            .collect();
        let powers = self
            .sums
            .iter()
            .zip(&self.counts)
            .map(|(sum, &count)| sum / count as f64)
            .collect();
        Ok(StitchedSpectrum {
            frequencies,
            powers,
            bin_width: self.plan.bin_width,
            log_scale: self.log_scale,
            source_hops: self.source_hops,
            captures: self.captures,
        })
    }
}
