use log::{debug, info, log_enabled, Level};

use crate::processing::hop_plan::HopPlan;
use crate::processing::queue::BufferLayout;
use crate::telemetry::metrics::MetricsSnapshot;

/// Formats session-level diagnostics for the `log` facade.
pub struct LogManager;

impl LogManager {
    pub fn new() -> Self {
        Self
    }

    pub fn record(&self, message: &str) {
        info!("{}", message);
    }

    pub fn hop_plan(&self, plan: &HopPlan, threshold_dbm: f64) {
        info!(
            "sweeping {:.3}..{:.3} MHz in {} hop(s): {} bins of {:.3} kHz, hop size {:.3} MHz, {:?}",
            plan.low / 1e6,
            plan.high / 1e6,
            plan.len(),
            plan.bins,
            plan.bin_width / 1e3,
            plan.hop_size / 1e6,
            plan.policy,
        );
        info!("detection threshold {:.1} dBm", threshold_dbm);

        if !log_enabled!(Level::Debug) {
            return;
        }
        let half_band = plan.sample_rate / 2.0;
        debug!("{:>8} {:>16} {:>16} {:>16}", "hop", "min (MHz)", "center (MHz)", "max (MHz)");
        for hop in plan.hops() {
            debug!(
                "{:>8} {:>16.3} {:>16.3} {:>16.3}",
                hop.index,
                (hop.center_frequency - half_band) / 1e6,
                hop.center_frequency / 1e6,
                (hop.center_frequency + half_band) / 1e6,
            );
        }
    }

    pub fn buffer_layout(&self, layout: &BufferLayout, sample_rate: f64) {
        let seconds = layout.samples_per_hop() as f64 / sample_rate;
        info!(
            "repeats {}, {} sample(s) per buffer, {} buffer(s) per hop, {:.3} ms per hop",
            layout.repeats,
            layout.buffer_size,
            layout.buffers_per_hop,
            seconds * 1e3,
        );
    }

    pub fn summary(&self, metrics: &MetricsSnapshot, elapsed: f64, queue_high_water: usize) {
        info!(
            "{} sweep(s) ({} incomplete), {} detection(s) in {:.3} s",
            metrics.sweeps, metrics.incomplete_sweeps, metrics.detections, elapsed
        );
        info!(
            "{} hop(s), {} buffer(s), {} read retries, {} failed hop(s), {} output error(s), queue high-water {}",
            metrics.hops_completed,
            metrics.buffers_processed,
            metrics.read_retries,
            metrics.failed_hops,
            metrics.output_errors,
            queue_high_water,
        );
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
