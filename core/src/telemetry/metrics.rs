use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Running pipeline counters, shared between the acquisition path and workers.
pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub buffers_processed: usize,
    pub hops_completed: usize,
    pub read_retries: usize,
    pub failed_hops: usize,
    pub sweeps: usize,
    pub incomplete_sweeps: usize,
    pub detections: usize,
    pub output_errors: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut metrics) = self.inner.lock() {
            apply(&mut metrics);
        }
    }

    pub fn record_processed(&self) {
        self.update(|m| m.buffers_processed += 1);
    }

    pub fn record_hop(&self) {
        self.update(|m| m.hops_completed += 1);
    }

    pub fn record_retry(&self) {
        self.update(|m| m.read_retries += 1);
    }

    pub fn record_failed_hop(&self) {
        self.update(|m| m.failed_hops += 1);
    }

    pub fn record_sweep(&self, complete: bool) {
        self.update(|m| {
            m.sweeps += 1;
            if !complete {
                m.incomplete_sweeps += 1;
            }
        });
    }

    pub fn record_detection(&self) {
        self.update(|m| m.detections += 1);
    }

    pub fn record_output_error(&self) {
        self.update(|m| m.output_errors += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
