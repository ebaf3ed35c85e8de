use chrono::{DateTime, Utc};
use num_complex::Complex32;

/// Raw capture travelling from the acquisition path to a PSD worker.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub hop_index: usize,
    /// Tuned center frequency of the hop, in the requested (pre-LNB) frame.
    pub center_frequency: f64,
    /// Position of this buffer within its hop, and the number of buffers the hop needs.
    pub part: usize,
    pub parts: usize,
    pub capture_start: DateTime<Utc>,
    pub samples: Vec<Complex32>,
}

/// Welch accumulation of one sample buffer, before per-hop averaging.
#[derive(Debug, Clone)]
pub struct PsdPartial {
    pub hop_index: usize,
    pub center_frequency: f64,
    pub part: usize,
    pub parts: usize,
    pub capture_start: DateTime<Utc>,
    pub sample_count: usize,
    /// Sum of shifted periodograms, linear power.
    pub power_sum: Vec<f64>,
    pub segments: usize,
    /// Sample magnitudes at the start of the hop; empty for later parts.
    pub magnitude_trace: Vec<f32>,
}

/// Averaged power spectrum of one hop, in ascending frequency order.
#[derive(Debug, Clone)]
pub struct PsdResult {
    pub hop_index: usize,
    pub bin_frequencies: Vec<f64>,
    pub power_values: Vec<f64>,
    pub capture_start: DateTime<Utc>,
    /// Capture duration of the hop in seconds.
    pub duration: f64,
    pub sample_count: usize,
    /// `true` when `power_values` are dB, `false` when linear.
    pub log_scale: bool,
    pub magnitude_trace: Vec<f32>,
}
