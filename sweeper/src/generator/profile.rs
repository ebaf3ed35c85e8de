use log::{debug, info};
use num_complex::Complex32;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use sweepcore::interface::{DeviceError, SampleSource};
use sweepcore::math::StatsHelper;
use sweepcore::prelude::{SweepError, SweepResult};

use crate::generator::template::Tone;

pub const SYNTHETIC_DEVICE: &str = "synthetic";

/// Receiver settings applied when a device is opened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub channel: usize,
    pub antenna: Option<String>,
    /// Gain in dB; `None` leaves the driver default.
    pub gain: Option<f64>,
    pub agc: bool,
    /// Hardware filter bandwidth in Hz; `0` keeps the driver default.
    pub bandwidth: f64,
    pub ppm: i32,
    /// Driver-specific `key=value,...` settings.
    pub settings: Option<String>,
}

/// Configuration for the synthetic receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub sample_rate: f64,
    pub tones: Vec<Tone>,
    /// Complex white noise power per sample, in dBm; `None` disables noise.
    pub noise_dbm: Option<f64>,
    pub seed: u64,
    pub mtu: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 2.0e6,
            tones: Vec::new(),
            noise_dbm: Some(-110.0),
            seed: 0,
            mtu: 1024,
        }
    }
}

/// Deterministic stand-in for a hardware receiver: ideal brick-wall passband,
/// phase-continuous tones and seeded noise.
pub struct SyntheticSource {
    config: GeneratorConfig,
    frequency: f64,
    sample: u64,
    rng: StdRng,
    active: bool,
    noise_scale: f64,
    failing_reads: usize,
    tunes: usize,
}

/// Opens the named device. Only the synthetic receiver is built in.
pub fn open_device(
    device: &str,
    settings: &DeviceSettings,
    config: GeneratorConfig,
) -> SweepResult<SyntheticSource> {
    let name = device.trim();
    let name = name.strip_prefix("driver=").unwrap_or(name);
    if !name.is_empty() && name != SYNTHETIC_DEVICE {
        return Err(SweepError::config(format!(
            "device {device:?} is not available, only {SYNTHETIC_DEVICE:?} is built in"
        )));
    }
    let source = SyntheticSource::new(config)?;
    info!(
        "opened {} device: {:.0} Hz sample rate, {} tone(s)",
        SYNTHETIC_DEVICE,
        source.config.sample_rate,
        source.config.tones.len()
    );
    debug!("device settings (no effect on synthetic samples): {:?}", settings);
    Ok(source)
}

impl SyntheticSource {
    pub fn new(config: GeneratorConfig) -> SweepResult<Self> {
        if config.sample_rate <= 0.0 {
            return Err(SweepError::config(format!(
                "sample rate must be positive, got {}",
                config.sample_rate
            )));
        }
        let noise_scale = config
            .noise_dbm
            .map(|dbm| StatsHelper::db_to_power(dbm).sqrt())
            .unwrap_or(0.0);
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            frequency: 0.0,
            sample: 0,
            active: false,
            noise_scale,
            failing_reads: 0,
            tunes: 0,
        })
    }

    /// The next `reads` reads time out.
    pub fn inject_failures(&mut self, reads: usize) {
        self.failing_reads = reads;
    }

    pub fn tunes(&self) -> usize {
        self.tunes
    }

    /// Complex Gaussian sample with `E|z|² = noise_scale²`.
    fn noise(&mut self) -> Complex32 {
        if self.noise_scale == 0.0 {
            return Complex32::new(0.0, 0.0);
        }
        let u: f64 = 1.0 - self.rng.gen::<f64>();
        let angle: f64 = self.rng.gen::<f64>() * TAU;
        let radius = self.noise_scale * (-u.ln()).sqrt();
        Complex32::from_polar(radius as f32, angle as f32)
    }
}

impl SampleSource for SyntheticSource {
    fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    fn frequency(&self) -> f64 {
        self.frequency
    }

    fn set_frequency(&mut self, frequency: f64) -> Result<(), DeviceError> {
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(DeviceError::Tune {
                frequency,
                reason: "frequency out of range".into(),
            });
        }
        self.frequency = frequency;
        self.tunes += 1;
        Ok(())
    }

    fn stream_mtu(&self) -> usize {
        self.config.mtu.max(1)
    }

    fn activate(&mut self) -> Result<(), DeviceError> {
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), DeviceError> {
        self.active = false;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [Complex32]) -> Result<(), DeviceError> {
        if !self.active {
            return Err(DeviceError::Driver("stream is not active".into()));
        }
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(DeviceError::Timeout);
        }

        let rate = self.config.sample_rate;
        let tuned = self.frequency;
        let tones: Vec<(Tone, f32)> = self
            .config
            .tones
            .iter()
            .filter(|tone| tone.in_passband(tuned, rate))
            .map(|tone| (*tone, tone.amplitude() as f32))
            .collect();

        for slot in buffer.iter_mut() {
            let mut value = self.noise();
            for (tone, amplitude) in &tones {
                let phase = tone.phase(tuned, rate, self.sample);
                value += Complex32::from_polar(*amplitude, phase as f32);
            }
            *slot = value;
            self.sample += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GeneratorConfig {
        GeneratorConfig {
            sample_rate: 1.0e6,
            tones: vec![Tone {
                frequency: 100.25e6,
                power_dbm: -20.0,
            }],
            noise_dbm: None,
            seed: 7,
            mtu: 256,
        }
    }

    #[test]
    fn only_synthetic_device_opens() {
        let settings = DeviceSettings::default();
        assert!(open_device("synthetic", &settings, config()).is_ok());
        assert!(open_device("driver=synthetic", &settings, config()).is_ok());
        assert!(matches!(
            open_device("driver=rtlsdr", &settings, config()),
            Err(SweepError::Config(_))
        ));
    }

    #[test]
    fn tone_power_matches_configuration() {
        let mut source = SyntheticSource::new(config()).unwrap();
        source.activate().unwrap();
        source.set_frequency(100.0e6).unwrap();
        let mut buffer = vec![Complex32::new(0.0, 0.0); 64];
        source.read(&mut buffer).unwrap();
        let power = buffer.iter().map(|s| s.norm_sqr() as f64).sum::<f64>() / 64.0;
        assert!((10.0 * power.log10() + 20.0).abs() < 1e-3);

        source.set_frequency(101.0e6).unwrap();
        source.read(&mut buffer).unwrap();
        assert!(buffer.iter().all(|s| s.norm() == 0.0));
        assert_eq!(source.tunes(), 2);
    }

    #[test]
    fn seeded_noise_is_reproducible() {
        let mut cfg = config();
        cfg.tones.clear();
        cfg.noise_dbm = Some(-60.0);
        let mut a = SyntheticSource::new(cfg.clone()).unwrap();
        let mut b = SyntheticSource::new(cfg).unwrap();
        a.activate().unwrap();
        b.activate().unwrap();
        let mut first = vec![Complex32::new(0.0, 0.0); 4096];
        let mut second = first.clone();
        a.read(&mut first).unwrap();
        b.read(&mut second).unwrap();
        assert_eq!(first, second);
        let power = first.iter().map(|s| s.norm_sqr() as f64).sum::<f64>() / 4096.0;
        assert!((10.0 * power.log10() + 60.0).abs() < 0.5);
    }

    #[test]
    fn injected_failures_time_out_then_recover() {
        let mut source = SyntheticSource::new(config()).unwrap();
        let mut buffer = vec![Complex32::new(0.0, 0.0); 8];
        assert!(matches!(source.read(&mut buffer), Err(DeviceError::Driver(_))));
        source.activate().unwrap();
        source.inject_failures(1);
        assert_eq!(source.read(&mut buffer), Err(DeviceError::Timeout));
        assert!(source.read(&mut buffer).is_ok());
        assert!(source.set_frequency(-1.0).is_err());
    }
}
