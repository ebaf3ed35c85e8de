use serde::{Deserialize, Serialize};

pub use crate::interface::device::DeviceError;

/// Common error type for sweep configuration and execution.
#[derive(thiserror::Error, Debug)]
pub enum SweepError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("compute error: {0}")]
    Compute(String),
    #[error("output error: {0}")]
    Output(String),
    #[error("pipeline failure: {0}")]
    Internal(String),
}

impl SweepError {
    pub fn config(message: impl Into<String>) -> Self {
        SweepError::Config(message.into())
    }
}

pub type SweepResult<T> = Result<T, SweepError>;

/// How adjacent hops are combined into one spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HopPolicy {
    /// Passbands overlap by the given fraction; shared bins are averaged.
    Overlap(f64),
    /// The given fraction of bins is discarded at interior hop edges.
    Crop(f64),
}

impl HopPolicy {
    /// Builds the policy from the two mutually exclusive user options.
    pub fn from_options(overlap: Option<f64>, crop: Option<f64>) -> SweepResult<Self> {
        match (overlap, crop) {
            (Some(_), Some(_)) => Err(SweepError::config(
                "overlap and crop are mutually exclusive",
            )),
            (None, Some(crop)) => Ok(HopPolicy::Crop(crop)),
            (overlap, None) => Ok(HopPolicy::Overlap(overlap.unwrap_or(0.0))),
        }
    }

    pub fn fraction(&self) -> f64 {
        match self {
            HopPolicy::Overlap(value) | HopPolicy::Crop(value) => *value,
        }
    }

    pub fn with_fraction(&self, fraction: f64) -> Self {
        match self {
            HopPolicy::Overlap(_) => HopPolicy::Overlap(fraction),
            HopPolicy::Crop(_) => HopPolicy::Crop(fraction),
        }
    }
}

/// Constraint on the FFT bin count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinConstraint {
    #[default]
    Any,
    Even,
    PowerOfTwo,
}

/// Averaging target per hop; exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AveragingTarget {
    /// Number of FFT-sized blocks read per hop.
    Repeats(usize),
    /// Integration time per hop, in seconds.
    HopTime(f64),
    /// Integration time for the whole sweep, in seconds.
    TotalTime(f64),
}

impl Default for AveragingTarget {
    fn default() -> Self {
        AveragingTarget::Repeats(1600)
    }
}

impl AveragingTarget {
    pub fn from_options(
        repeats: Option<usize>,
        hop_time: Option<f64>,
        total_time: Option<f64>,
    ) -> SweepResult<Self> {
        match (repeats, hop_time, total_time) {
            (None, None, None) => Ok(AveragingTarget::default()),
            (Some(repeats), None, None) => Ok(AveragingTarget::Repeats(repeats)),
            (None, Some(time), None) => Ok(AveragingTarget::HopTime(time)),
            (None, None, Some(time)) => Ok(AveragingTarget::TotalTime(time)),
            _ => Err(SweepError::config(
                "repeats, integration time and total integration time are mutually exclusive",
            )),
        }
    }

    /// Number of `bins`-sized blocks to read per hop.
    pub fn repeats(&self, sample_rate: f64, bins: usize, hops: usize) -> SweepResult<usize> {
        let repeats = match *self {
            AveragingTarget::Repeats(repeats) => repeats,
            AveragingTarget::HopTime(time) => time_to_repeats(sample_rate, bins, time)?,
            AveragingTarget::TotalTime(time) => {
                time_to_repeats(sample_rate, bins, time / hops.max(1) as f64)?
            }
        };
        if repeats == 0 {
            return Err(SweepError::config("averaging target yields zero repeats"));
        }
        Ok(repeats)
    }
}

fn time_to_repeats(sample_rate: f64, bins: usize, time: f64) -> SweepResult<usize> {
    if time.is_nan() || time <= 0.0 {
        return Err(SweepError::config(format!(
            "integration time must be positive, got {time}"
        )));
    }
    Ok((sample_rate * time / bins as f64).ceil() as usize)
}

/// When a session stops issuing sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Sweep until interrupted.
    Continuous,
    /// Stop after this many completed sweeps.
    Runs(u64),
    /// Stop once this many seconds have elapsed (checked between sweeps).
    Elapsed(f64),
}

impl StopPolicy {
    pub fn from_options(
        continuous: bool,
        runs: Option<u64>,
        elapsed: Option<f64>,
    ) -> SweepResult<Self> {
        match (continuous, runs, elapsed) {
            (false, None, None) => Ok(StopPolicy::Runs(1)),
            (true, None, None) => Ok(StopPolicy::Continuous),
            (false, Some(runs), None) if runs > 0 => Ok(StopPolicy::Runs(runs)),
            (false, None, Some(secs)) if secs > 0.0 => Ok(StopPolicy::Elapsed(secs)),
            (false, Some(_), None) | (false, None, Some(_)) => Err(SweepError::config(
                "run count and elapsed time must be positive",
            )),
            _ => Err(SweepError::config(
                "continue, runs and elapsed are mutually exclusive",
            )),
        }
    }
}
