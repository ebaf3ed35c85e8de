use crate::generator::profile::{DeviceSettings, GeneratorConfig, SYNTHETIC_DEVICE};
use crate::generator::template::Tone;
use crate::output::format::OutputFormat;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use sweepcore::math::{TransformBackend, WindowFunction};
use sweepcore::prelude::{
    AveragingTarget, BinConstraint, HopPolicy, StopPolicy, SweepError, SweepResult,
};
use sweepcore::processing::hop_plan::{bins_for_bin_size, HopPlanRequest};
use sweepcore::processing::psd::SpectralSettings;
use sweepcore::processing::queue::SizeLimit;
use sweepcore::session::{SessionConfig, DEFAULT_READ_RETRIES, DEFAULT_THRESHOLD_DBM};

/// Parses a frequency with an optional `k`, `M` or `G` suffix into Hz.
pub fn parse_frequency(value: &str) -> Result<f64, String> {
    let value = value.trim();
    let (number, scale) = match value.char_indices().last() {
        Some((index, 'k' | 'K')) => (&value[..index], 1e3),
        Some((index, 'M')) => (&value[..index], 1e6),
        Some((index, 'G' | 'g')) => (&value[..index], 1e9),
        _ => (value, 1.0),
    };
    let number: f64 = number
        .trim()
        .parse()
        .map_err(|err| format!("invalid frequency {value:?}: {err}"))?;
    if !number.is_finite() {
        return Err(format!("invalid frequency {value:?}"));
    }
    Ok(number * scale)
}

/// Parses `LOW:HIGH`, e.g. `2400M:2480M`.
pub fn parse_frequency_range(value: &str) -> Result<(f64, f64), String> {
    let (low, high) = value
        .split_once(':')
        .ok_or_else(|| format!("frequency range {value:?} must be LOW:HIGH"))?;
    Ok((parse_frequency(low)?, parse_frequency(high)?))
}

/// Full driver configuration, loadable from YAML or built from the command line.
///
/// Percentages (`overlap`, `crop`, `fft_overlap`) are given in percent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub low: f64,
    pub high: f64,
    pub sample_rate: f64,
    pub bins: Option<usize>,
    pub bin_size: Option<f64>,
    pub repeats: Option<usize>,
    pub time: Option<f64>,
    pub total_time: Option<f64>,
    pub continuous: bool,
    pub runs: Option<u64>,
    pub elapsed: Option<f64>,
    pub overlap: Option<f64>,
    pub crop: Option<f64>,
    pub even: bool,
    pub pow2: bool,
    pub lnb_lo: f64,
    pub device: String,
    pub device_settings: DeviceSettings,
    pub max_buffer_size: i64,
    pub max_queue_size: i64,
    pub max_threads: usize,
    pub fft_window: String,
    pub fft_window_param: Option<f64>,
    pub fft_overlap: f64,
    pub linear: bool,
    pub remove_dc: bool,
    pub detrend: bool,
    pub backends: Vec<TransformBackend>,
    pub threshold: f64,
    pub tune_delay: f64,
    pub reset_stream: bool,
    pub read_retries: usize,
    pub skip_failed_hops: bool,
    pub format: OutputFormat,
    pub output: Option<PathBuf>,
    pub server: Option<String>,
    pub port: u16,
    pub serve: Option<SocketAddr>,
    /// Write a PNG plot per detection.
    pub plot: bool,
    /// Directory for plots; the system temp directory when absent.
    pub plot_dir: Option<PathBuf>,
    pub tones: Vec<Tone>,
    pub noise_dbm: Option<f64>,
    pub seed: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            low: 0.0,
            high: 0.0,
            sample_rate: 2.0e6,
            bins: None,
            bin_size: None,
            repeats: None,
            time: None,
            total_time: None,
            continuous: false,
            runs: None,
            elapsed: None,
            overlap: None,
            crop: None,
            even: false,
            pow2: false,
            lnb_lo: 0.0,
            device: SYNTHETIC_DEVICE.into(),
            device_settings: DeviceSettings::default(),
            max_buffer_size: 0,
            max_queue_size: 0,
            max_threads: 0,
            fft_window: "hann".into(),
            fft_window_param: None,
            fft_overlap: 50.0,
            linear: false,
            remove_dc: false,
            detrend: false,
            backends: TransformBackend::PREFERENCE.to_vec(),
            threshold: DEFAULT_THRESHOLD_DBM,
            tune_delay: 0.0,
            reset_stream: false,
            read_retries: DEFAULT_READ_RETRIES,
            skip_failed_hops: false,
            format: OutputFormat::default(),
            output: None,
            server: None,
            port: 2048,
            serve: None,
            plot: false,
            plot_dir: None,
            tones: Vec::new(),
            noise_dbm: Some(-110.0),
            seed: 0,
        }
    }
}

fn percent(value: f64, name: &str) -> SweepResult<f64> {
    if !(0.0..100.0).contains(&value) {
        return Err(SweepError::config(format!(
            "{name} must be within [0, 100) %, got {value}"
        )));
    }
    Ok(value / 100.0)
}

impl SweepConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading sweep config {}", path_ref.display()))?;
        let config: SweepConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing sweep config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(range: (f64, f64), sample_rate: f64, bins: usize) -> Self {
        Self {
            low: range.0,
            high: range.1,
            sample_rate,
            bins: Some(bins),
            ..Default::default()
        }
    }

    fn bin_count(&self) -> SweepResult<usize> {
        match (self.bins, self.bin_size) {
            (Some(_), Some(_)) => Err(SweepError::config(
                "bins and bin size are mutually exclusive",
            )),
            (Some(bins), None) => Ok(bins),
            (None, Some(size)) => bins_for_bin_size(self.sample_rate, size),
            (None, None) => Ok(512),
        }
    }

    fn constraint(&self) -> BinConstraint {
        if self.pow2 {
            BinConstraint::PowerOfTwo
        } else if self.even {
            BinConstraint::Even
        } else {
            BinConstraint::Any
        }
    }

    pub fn spectral_settings(&self) -> SweepResult<SpectralSettings> {
        Ok(SpectralSettings {
            window: WindowFunction::parse(&self.fft_window, self.fft_window_param)?,
            fft_overlap: percent(self.fft_overlap, "FFT overlap")?,
            log_scale: !self.linear,
            remove_dc: self.remove_dc,
            detrend: self.detrend,
        })
    }

    /// Validates the configuration into the session's typed settings.
    pub fn to_session_config(&self) -> SweepResult<SessionConfig> {
        let policy = HopPolicy::from_options(
            self.overlap.map(|v| percent(v, "overlap")).transpose()?,
            self.crop.map(|v| percent(v, "crop")).transpose()?,
        )?;
        if !self.tune_delay.is_finite() || self.tune_delay < 0.0 {
            return Err(SweepError::config(format!(
                "tune delay must be a finite, non-negative number of seconds, got {}",
                self.tune_delay
            )));
        }

        let mut session = SessionConfig::new(HopPlanRequest {
            low: self.low,
            high: self.high,
            sample_rate: self.sample_rate,
            bins: self.bin_count()?,
            policy,
            constraint: self.constraint(),
            lnb_lo: self.lnb_lo,
        });
        session.averaging = AveragingTarget::from_options(self.repeats, self.time, self.total_time)?;
        session.stop = StopPolicy::from_options(self.continuous, self.runs, self.elapsed)?;
        session.spectral = self.spectral_settings()?;
        session.backends = self.backends.clone();
        session.threads = self.max_threads;
        session.max_queue_size = SizeLimit::from_setting(self.max_queue_size)?;
        session.max_buffer_size = SizeLimit::from_setting(self.max_buffer_size)?;
        session.tune_delay = self.tune_delay;
        session.reset_stream = self.reset_stream;
        session.threshold_dbm = self.threshold;
        session.read_retries = self.read_retries;
        session.skip_failed_hops = self.skip_failed_hops;
        Ok(session)
    }

    pub fn plot_directory(&self) -> PathBuf {
        self.plot_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            sample_rate: self.sample_rate,
            tones: self.tones.clone(),
            noise_dbm: self.noise_dbm,
            seed: self.seed,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn frequencies_accept_suffixes() {
        assert_eq!(parse_frequency("2400M").unwrap(), 2400.0e6);
        assert_eq!(parse_frequency("2.4G").unwrap(), 2.4e9);
        assert_eq!(parse_frequency("125k").unwrap(), 125.0e3);
        assert_eq!(parse_frequency("1e6").unwrap(), 1.0e6);
        assert!(parse_frequency("fast").is_err());
        assert_eq!(
            parse_frequency_range("2400M:2480M").unwrap(),
            (2400.0e6, 2480.0e6)
        );
        assert!(parse_frequency_range("2400M").is_err());
    }

    #[test]
    fn config_from_args_produces_session_config() {
        let mut cfg = SweepConfig::from_args((2400.0e6, 2480.0e6), 16.0e6, 128);
        cfg.overlap = Some(50.0);
        let session = cfg.to_session_config().unwrap();
        assert_eq!(session.plan.bins, 128);
        assert_eq!(session.plan.policy, HopPolicy::Overlap(0.5));
        assert_eq!(session.stop, StopPolicy::Runs(1));
        assert_eq!(session.averaging, AveragingTarget::Repeats(1600));
        assert_eq!(session.spectral.fft_overlap, 0.5);
        assert_eq!(session.threshold_dbm, -85.0);
    }

    #[test]
    fn conflicting_options_are_config_errors() {
        let mut both = SweepConfig::from_args((1.0e6, 2.0e6), 1.0e6, 64);
        both.overlap = Some(10.0);
        both.crop = Some(10.0);
        assert!(matches!(both.to_session_config(), Err(SweepError::Config(_))));

        let mut timing = SweepConfig::from_args((1.0e6, 2.0e6), 1.0e6, 64);
        timing.repeats = Some(10);
        timing.time = Some(0.1);
        assert!(timing.to_session_config().is_err());

        let mut window = SweepConfig::from_args((1.0e6, 2.0e6), 1.0e6, 64);
        window.fft_window = "kaiser".into();
        assert!(window.to_session_config().is_err());

        let mut sizes = SweepConfig::from_args((1.0e6, 2.0e6), 1.0e6, 64);
        sizes.bin_size = Some(1000.0);
        assert!(sizes.to_session_config().is_err());

        for delay in [f64::INFINITY, f64::NAN, -0.5] {
            let mut tune = SweepConfig::from_args((1.0e6, 2.0e6), 1.0e6, 64);
            tune.tune_delay = delay;
            assert!(matches!(tune.to_session_config(), Err(SweepError::Config(_))));
        }
    }

    #[test]
    fn bin_size_sets_bin_count() {
        let mut cfg = SweepConfig::from_args((1.0e6, 2.0e6), 2.0e6, 0);
        cfg.bins = None;
        cfg.bin_size = Some(1.0e3);
        assert_eq!(cfg.to_session_config().unwrap().plan.bins, 2000);
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"low: 433.0e6\nhigh: 435.0e6\nsample_rate: 1.0e6\nbins: 256\ncrop: 25\nruns: 4\nformat: json\ntones:\n  - frequency: 433.92e6\n    power_dbm: -70\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = SweepConfig::load(&path).unwrap();
        assert_eq!(cfg.bins, Some(256));
        assert_eq!(cfg.format, OutputFormat::Json);
        assert_eq!(cfg.tones.len(), 1);
        let session = cfg.to_session_config().unwrap();
        assert_eq!(session.plan.policy, HopPolicy::Crop(0.25));
        assert_eq!(session.stop, StopPolicy::Runs(4));
    }
}
