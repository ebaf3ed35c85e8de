use std::borrow::Cow;

use chrono::Utc;
use log::debug;

use crate::interface::detection::DetectionRecord;
use crate::math::stats::StatsHelper;
use crate::processing::stitcher::StitchedSpectrum;

/// Drop below the peak that bounds the reported bandwidth.
pub const BANDWIDTH_DROP_DB: f64 = 3.0;

/// Finds the strongest signal of a sweep and measures its -3 dB width.
#[derive(Debug, Clone, Copy)]
pub struct SignalDetector {
    threshold_dbm: f64,
}

impl SignalDetector {
    pub fn new(threshold_dbm: f64) -> Self {
        Self { threshold_dbm }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold_dbm
    }

    pub fn detect(&self, spectrum: &StitchedSpectrum) -> Option<DetectionRecord> {
        if spectrum.is_empty() {
            return None;
        }
        let levels: Cow<[f64]> = if spectrum.log_scale {
            Cow::Borrowed(&spectrum.powers)
        } else {
            Cow::Owned(
                spectrum
                    .powers
                    .iter()
                    .map(|&p| StatsHelper::power_to_db(p))
                    .collect(),
            )
        };

        let (peak, peak_level) = levels
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, level)| {
                if level > best.1 {
                    (i, level)
                } else {
                    best
                }
            });
        if peak_level < self.threshold_dbm {
            debug!(
                "sweep maximum {:.1} dBm below threshold {:.1} dBm",
                peak_level, self.threshold_dbm
            );
            return None;
        }

        let floor = peak_level - BANDWIDTH_DROP_DB;
        let mut left = peak;
        while left > 0 && levels[left] > floor {
            left -= 1;
        }
        let mut right = peak;
        while right + 1 < levels.len() && levels[right] > floor {
            right += 1;
        }
        let width =
            (spectrum.frequencies[right] - spectrum.frequencies[left]).max(spectrum.bin_width);

        let (span_low, span_high) = spectrum.span();
        let capture = spectrum.capture_for_bin(peak);
        let report_time = capture.map(|c| c.start).unwrap_or_else(Utc::now);
        let magnitude_trace = capture
            .map(|c| c.magnitude_trace.clone())
            .unwrap_or_default();

        Some(DetectionRecord {
            report_time,
            peak_frequency_mhz: spectrum.frequencies[peak] / 1e6,
            bandwidth_khz: width / 1e3,
            psd: levels.iter().map(|&level| level as i32).collect(),
            span_mhz: (span_low / 1e6, span_high / 1e6),
            duration_ms: spectrum.total_duration() * 1e3,
            rssi_dbm: peak_level,
            bin_width_hz: spectrum.bin_width,
            sample_count: spectrum.total_samples(),
            magnitude_trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::stitcher::HopCapture;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    const BIN_WIDTH: f64 = 125.0e3;

    fn spectrum(powers: Vec<f64>, log_scale: bool) -> StitchedSpectrum {
        let len = powers.len();
        let mut captures = BTreeMap::new();
        captures.insert(
            0,
            HopCapture {
                start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                duration: 0.002,
                samples: 32_000,
                magnitude_trace: vec![0.1; 4],
            },
        );
        captures.insert(
            1,
            HopCapture {
                start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap(),
                duration: 0.003,
                samples: 48_000,
                magnitude_trace: vec![0.2; 4],
            },
        );
        StitchedSpectrum {
            frequencies: (0..len).map(|k| 100.0e6 + k as f64 * BIN_WIDTH).collect(),
            powers,
            bin_width: BIN_WIDTH,
            log_scale,
            source_hops: (0..len).map(|k| usize::from(k >= len / 2)).collect(),
            captures,
        }
    }

    #[test]
    fn single_tone_reports_frequency_and_level() {
        let mut powers = vec![-120.0; 40];
        powers[30] = -88.7;
        let record = SignalDetector::new(-100.0).detect(&spectrum(powers, true)).unwrap();
        assert!((record.peak_frequency_mhz - 103.75).abs() < 1e-9);
        assert_eq!(record.rssi_dbm, -88.7);
        // bounded by the neighbouring bins
        assert!((record.bandwidth_khz - 250.0).abs() < 1e-9);
        assert_eq!(record.span_mhz, (100.0, 104.875));
        assert!((record.duration_ms - 5.0).abs() < 1e-9);
        assert_eq!(record.sample_count, 80_000);
        assert_eq!(record.report_time, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap());
        assert_eq!(record.psd[30], -88);
        assert_eq!(record.magnitude_trace, vec![0.2; 4]);
    }

    #[test]
    fn plateau_width_is_measured_between_crossings() {
        let mut powers = vec![-120.0; 40];
        // 8 bins within 3 dB of the peak
        for (offset, level) in [-60.0, -61.0, -62.5, -60.5, -61.5, -62.0, -60.2, -61.0]
            .iter()
            .enumerate()
        {
            powers[10 + offset] = *level;
        }
        let record = SignalDetector::new(-100.0).detect(&spectrum(powers, true)).unwrap();
        assert_eq!(record.rssi_dbm, -60.0);
        // crossings at bins 9 and 18
        assert!((record.bandwidth_khz - 9.0 * 125.0).abs() < 1e-9);
        assert_eq!(record.report_time, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn below_threshold_yields_nothing() {
        let powers = vec![-120.0; 16];
        assert!(SignalDetector::new(-100.0).detect(&spectrum(powers, true)).is_none());
    }

    #[test]
    fn linear_spectrum_is_compared_in_db() {
        let mut powers = vec![1e-12; 16];
        powers[4] = 1e-9;
        let detector = SignalDetector::new(-100.0);
        let record = detector.detect(&spectrum(powers, false)).unwrap();
        assert!((record.rssi_dbm + 90.0).abs() < 1e-9);
        assert_eq!(record.psd.len(), 16);
    }

    #[test]
    fn peak_on_the_edge_stops_at_the_array_bound() {
        let mut powers = vec![-120.0; 16];
        powers[0] = -50.0;
        powers[1] = -51.0;
        let record = SignalDetector::new(-100.0).detect(&spectrum(powers, true)).unwrap();
        assert!((record.peak_frequency_mhz - 100.0).abs() < 1e-12);
        assert!((record.bandwidth_khz - 250.0).abs() < 1e-9);
    }
}
