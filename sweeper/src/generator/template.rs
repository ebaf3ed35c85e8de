use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sweepcore::math::StatsHelper;

use crate::workflow::config::parse_frequency;

/// A continuous-wave tone injected by the synthetic device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tone {
    /// Absolute frequency in Hz.
    pub frequency: f64,
    /// Power in dBm, referenced the same way as the reported PSD.
    pub power_dbm: f64,
}

impl Tone {
    pub fn amplitude(&self) -> f64 {
        StatsHelper::db_to_power(self.power_dbm).sqrt()
    }

    /// Phase of the tone at `sample` while tuned to `tuned`, in `[0, 2π)`.
    pub fn phase(&self, tuned: f64, sample_rate: f64, sample: u64) -> f64 {
        let offset = self.frequency - tuned;
        (TAU * offset * sample as f64 / sample_rate).rem_euclid(TAU)
    }

    /// Whether the tone falls inside the passband of a receiver tuned to `tuned`.
    pub fn in_passband(&self, tuned: f64, sample_rate: f64) -> bool {
        (self.frequency - tuned).abs() < sample_rate / 2.0
    }
}

/// `FREQ:DBM`, e.g. `2421.875M:-88.7`.
impl FromStr for Tone {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (frequency, power) = value
            .rsplit_once(':')
            .ok_or_else(|| format!("tone {value:?} must be FREQ:DBM"))?;
        let frequency = parse_frequency(frequency)?;
        let power_dbm = power
            .trim()
            .parse::<f64>()
            .map_err(|err| format!("invalid tone power {power:?}: {err}"))?;
        Ok(Tone {
            frequency,
            power_dbm,
        })
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} MHz @ {:.1} dBm", self.frequency / 1e6, self.power_dbm)
    }
}
