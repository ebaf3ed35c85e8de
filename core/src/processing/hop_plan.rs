use std::ops::Range;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::prelude::{BinConstraint, HopPolicy, SweepError, SweepResult};

/// Tolerance for float ratios that should land on whole bins.
const GRID_EPSILON: f64 = 1e-9;

/// What the caller wants swept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopPlanRequest {
    pub low: f64,
    pub high: f64,
    pub sample_rate: f64,
    pub bins: usize,
    pub policy: HopPolicy,
    #[serde(default)]
    pub constraint: BinConstraint,
    /// Local oscillator of an external downconverter, subtracted before tuning.
    #[serde(default)]
    pub lnb_lo: f64,
}

/// One tuned capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hop {
    pub index: usize,
    /// Center of the passband in the requested frequency frame.
    pub center_frequency: f64,
    /// Frequency the device is actually tuned to.
    pub tune_frequency: f64,
}

/// Ordered hop sequence covering `[low, high]`.
#[derive(Debug, Clone)]
pub struct HopPlan {
    pub low: f64,
    pub high: f64,
    pub sample_rate: f64,
    pub bins: usize,
    pub bin_width: f64,
    /// Policy with the fraction adjusted to an even number of bins.
    pub policy: HopPolicy,
    pub hop_size: f64,
    hops: Vec<Hop>,
}

/// Frequency of shifted (DC-centred) bin `bin` of an `bins`-point FFT.
pub fn shifted_bin_frequency(center: f64, bin_width: f64, bins: usize, bin: usize) -> f64 {
    center + (bin as f64 - (bins / 2) as f64) * bin_width
}

/// Converts a bin size in Hz to the number of FFT bins.
pub fn bins_for_bin_size(sample_rate: f64, bin_size: f64) -> SweepResult<usize> {
    if bin_size <= 0.0 || sample_rate <= 0.0 {
        return Err(SweepError::config("bin size and sample rate must be positive"));
    }
    Ok((sample_rate / bin_size - GRID_EPSILON).ceil() as usize)
}

fn check_bins(bins: usize, constraint: BinConstraint) -> SweepResult<()> {
    if bins == 0 {
        return Err(SweepError::config("number of FFT bins must be positive"));
    }
    match constraint {
        BinConstraint::Even if bins % 2 != 0 => Err(SweepError::config(format!(
            "number of FFT bins must be even, got {bins}"
        ))),
        BinConstraint::PowerOfTwo if !bins.is_power_of_two() => Err(SweepError::config(format!(
            "number of FFT bins must be a power of two, got {bins}"
        ))),
        _ => Ok(()),
    }
}

/// Rounds the overlapping/cropped bin count up to an even number.
fn even_fraction(fraction: f64, bins: usize) -> SweepResult<f64> {
    if !(0.0..1.0).contains(&fraction) {
        return Err(SweepError::config(format!(
            "overlap/crop fraction must be within [0, 1), got {fraction}"
        )));
    }
    let shared = fraction * bins as f64;
    let rounded = shared.round();
    if (shared - rounded).abs() < GRID_EPSILON && rounded as u64 % 2 == 0 {
        return Ok(fraction);
    }
    let adjusted = (shared / 2.0).ceil() * 2.0 / bins as f64;
    warn!(
        "number of overlapping FFT bins should be even, changing overlap/crop factor to {:.5}",
        adjusted
    );
    if adjusted >= 1.0 {
        return Err(SweepError::config(format!(
            "overlap/crop fraction {fraction} leaves no bins with {bins} FFT bins"
        )));
    }
    Ok(adjusted)
}

pub struct HopPlanner;

impl HopPlanner {
    pub fn plan(request: &HopPlanRequest) -> SweepResult<HopPlan> {
        if request.sample_rate <= 0.0 {
            return Err(SweepError::config(format!(
                "sample rate must be positive, got {}",
                request.sample_rate
            )));
        }
        if request.high <= request.low {
            return Err(SweepError::config(format!(
                "invalid frequency range {}..{}",
                request.low, request.high
            )));
        }
        check_bins(request.bins, request.constraint)?;

        let bins = request.bins;
        let fraction = even_fraction(request.policy.fraction(), bins)?;
        let policy = request.policy.with_fraction(fraction);
        let bin_width = request.sample_rate / bins as f64;
        let span = request.high - request.low;

        let sample_rate_crop = (1.0 - fraction) * request.sample_rate;
        let hop_size = (sample_rate_crop / bin_width).round() * bin_width;
        if hop_size <= 0.0 {
            return Err(SweepError::config("hop size rounds to zero bins"));
        }
        let hopping = span >= sample_rate_crop;
        let count = if hopping {
            (span / hop_size - GRID_EPSILON).ceil() as usize
        } else {
            1
        };
        // Hopping rounds down so hop 0's lowest bin never lands above `low`
        // when the hop holds an odd number of bins.
        let first_bins = if hopping {
            (hop_size / 2.0 / bin_width + GRID_EPSILON).floor()
        } else {
            (span / 2.0 / bin_width).round()
        };
        let first_center = request.low + first_bins * bin_width;

        let hops = (0..count.max(1))
            .map(|index| {
                let center_frequency = first_center + index as f64 * hop_size;
                Hop {
                    index,
                    center_frequency,
                    tune_frequency: center_frequency - request.lnb_lo,
                }
            })
            .collect();

        Ok(HopPlan {
            low: request.low,
            high: request.high,
            sample_rate: request.sample_rate,
            bins,
            bin_width,
            policy,
            hop_size,
            hops,
        })
    }
}

impl HopPlan {
    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Number of stitched bins, `ceil(span / bin_width)`.
    pub fn grid_len(&self) -> usize {
        ((self.high - self.low) / self.bin_width - GRID_EPSILON).ceil() as usize
    }

    /// Bins discarded at each interior edge in crop mode.
    pub fn crop_per_edge(&self) -> usize {
        match self.policy {
            HopPolicy::Crop(fraction) => (fraction * self.bins as f64).round() as usize / 2,
            HopPolicy::Overlap(_) => 0,
        }
    }

    /// Range of shifted bin indices a hop contributes to the stitched spectrum.
    pub fn kept_bins(&self, hop_index: usize) -> Range<usize> {
        let crop = self.crop_per_edge();
        let start = if hop_index == 0 { 0 } else { crop };
        let end = if hop_index + 1 >= self.hops.len() {
            self.bins
        } else {
            self.bins - crop
        };
        start..end
    }

    /// Frequency of shifted bin `bin` for a hop centered at `center`.
    pub fn bin_frequency(&self, center: f64, bin: usize) -> f64 {
        shifted_bin_frequency(center, self.bin_width, self.bins, bin)
    }

    /// Stitched-grid index of an absolute frequency.
    pub fn grid_index(&self, frequency: f64) -> i64 {
        ((frequency - self.low) / self.bin_width).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn request(low: f64, high: f64, policy: HopPolicy) -> HopPlanRequest {
        HopPlanRequest {
            low,
            high,
            sample_rate: 16.0e6,
            bins: 128,
            policy,
            constraint: BinConstraint::Any,
            lnb_lo: 0.0,
        }
    }

    fn covered(plan: &HopPlan) -> Vec<i64> {
        let mut indices = Vec::new();
        for hop in plan.hops() {
            for bin in plan.kept_bins(hop.index) {
                indices.push(plan.grid_index(plan.bin_frequency(hop.center_frequency, bin)));
            }
        }
        indices
    }

    #[test]
    fn overlap_plan_for_ism_band() {
        let plan = HopPlanner::plan(&request(2400.0e6, 2480.0e6, HopPolicy::Overlap(0.5))).unwrap();
        assert_eq!(plan.len(), 10);
        assert_eq!(plan.hop_size, 8.0e6);
        assert_eq!(plan.hops()[0].center_frequency, 2404.0e6);
        assert_eq!(plan.hops()[9].center_frequency, 2476.0e6);
        assert_eq!(plan.grid_len(), 640);
    }

    #[test]
    fn union_of_passbands_covers_span() {
        for (sample_rate, bins) in [(16.0e6, 128), (16.0e6, 127), (2.0e6, 667), (2.0e6, 513)] {
            for fraction in [0.0, 0.1, 0.25, 0.5, 0.75] {
                for (low, high) in [
                    (100.0e6, 101.0e6),
                    (100.0e6, 110.0e6),
                    (2400.0e6, 2480.0e6),
                    (433.0e6, 470.3e6),
                ] {
                    for policy in [HopPolicy::Overlap(fraction), HopPolicy::Crop(fraction)] {
                        let mut req = request(low, high, policy);
                        req.sample_rate = sample_rate;
                        req.bins = bins;
                        let plan = HopPlanner::plan(&req).unwrap();
                        let set: BTreeSet<i64> = covered(&plan).into_iter().collect();
                        for index in 0..plan.grid_len() as i64 {
                            assert!(
                                set.contains(&index),
                                "{bins} bins, {policy:?} misses bin {index}"
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn odd_bin_count_starts_at_low_edge() {
        let mut req = request(100.0e6, 110.0e6, HopPolicy::Overlap(0.0));
        req.sample_rate = 2.0e6;
        req.bins = 667;
        let plan = HopPlanner::plan(&req).unwrap();
        assert_eq!(plan.len(), 5);
        let first = plan.hops()[0];
        let lowest = plan.grid_index(plan.bin_frequency(first.center_frequency, 0));
        assert_eq!(lowest, 0);
    }

    #[test]
    fn crop_segments_do_not_overlap() {
        let plan = HopPlanner::plan(&request(2400.0e6, 2480.0e6, HopPolicy::Crop(0.5))).unwrap();
        let indices: Vec<i64> = covered(&plan)
            .into_iter()
            .filter(|&i| i >= 0 && i < plan.grid_len() as i64)
            .collect();
        let unique: BTreeSet<i64> = indices.iter().copied().collect();
        assert_eq!(indices.len(), unique.len());
        assert_eq!(plan.kept_bins(3), 32..96);
    }

    #[test]
    fn single_hop_when_span_fits() {
        let plan = HopPlanner::plan(&request(100.0e6, 104.0e6, HopPolicy::Overlap(0.0))).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.hops()[0].center_frequency, 102.0e6);
        assert_eq!(plan.kept_bins(0), 0..128);
    }

    #[test]
    fn odd_overlap_is_rounded_to_even_bins() {
        let plan = HopPlanner::plan(&request(100.0e6, 200.0e6, HopPolicy::Overlap(0.1))).unwrap();
        // 12.8 shared bins round up to 14
        assert!((plan.policy.fraction() - 14.0 / 128.0).abs() < 1e-12);
    }

    #[test]
    fn lnb_offset_shifts_tuning_only() {
        let mut req = request(10_400.0e6, 10_410.0e6, HopPolicy::Overlap(0.0));
        req.lnb_lo = 9_750.0e6;
        let plan = HopPlanner::plan(&req).unwrap();
        let hop = plan.hops()[0];
        assert_eq!(hop.center_frequency - hop.tune_frequency, 9_750.0e6);
    }

    #[test]
    fn invalid_requests_are_config_errors() {
        let mut bad_rate = request(1.0e6, 2.0e6, HopPolicy::Overlap(0.0));
        bad_rate.sample_rate = 0.0;
        assert!(matches!(HopPlanner::plan(&bad_rate), Err(SweepError::Config(_))));

        let mut odd = request(1.0e6, 2.0e6, HopPolicy::Overlap(0.0));
        odd.bins = 127;
        odd.constraint = BinConstraint::Even;
        assert!(HopPlanner::plan(&odd).is_err());

        let mut not_pow2 = request(1.0e6, 2.0e6, HopPolicy::Overlap(0.0));
        not_pow2.bins = 96;
        not_pow2.constraint = BinConstraint::PowerOfTwo;
        assert!(HopPlanner::plan(&not_pow2).is_err());

        assert!(HopPlanner::plan(&request(2.0e6, 1.0e6, HopPolicy::Overlap(0.0))).is_err());
        assert!(HopPlanner::plan(&request(1.0e6, 2.0e6, HopPolicy::Crop(1.0))).is_err());
    }

    #[test]
    fn bin_size_converts_to_bins() {
        assert_eq!(bins_for_bin_size(16.0e6, 125.0e3).unwrap(), 128);
        assert_eq!(bins_for_bin_size(2.0e6, 3.0e3).unwrap(), 667);
    }
}
