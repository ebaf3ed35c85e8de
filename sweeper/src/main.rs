use anyhow::Context;
use clap::Parser;
use generator::template::Tone;
use log::{info, warn, LevelFilter};
use output::format::OutputFormat;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use sweepcore::math::TransformBackend;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::{parse_frequency, parse_frequency_range, SweepConfig};
use workflow::runner::Runner;

mod generator;
mod output;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Sweeps a receiver across a band and reports the strongest signal")]
struct Args {
    /// Frequency range LOW:HIGH, e.g. 2400M:2480M
    #[arg(short = 'f', long, value_parser = parse_frequency_range)]
    freq: Option<(f64, f64)>,
    /// Load the sweep configuration from YAML; command-line options are ignored
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of FFT bins
    #[arg(short = 'b', long, conflicts_with = "bin_size")]
    bins: Option<usize>,
    /// FFT bin size in Hz (k/M/G suffixes allowed)
    #[arg(short = 'B', long, value_parser = parse_frequency)]
    bin_size: Option<f64>,
    /// Number of FFT-sized blocks averaged per hop (default 1600)
    #[arg(short = 'n', long, conflicts_with_all = ["time", "total_time"])]
    repeats: Option<usize>,
    /// Integration time per hop in seconds
    #[arg(short = 't', long, conflicts_with = "total_time")]
    time: Option<f64>,
    /// Integration time of the whole sweep in seconds
    #[arg(short = 'T', long)]
    total_time: Option<f64>,

    /// Sweep until interrupted
    #[arg(short = 'c', long = "continue", conflicts_with_all = ["runs", "elapsed"])]
    continuous: bool,
    /// Number of sweeps (default 1)
    #[arg(short = 'u', long, conflicts_with = "elapsed")]
    runs: Option<u64>,
    /// Stop after this many seconds, checked between sweeps
    #[arg(short = 'e', long)]
    elapsed: Option<f64>,

    /// Device to open
    #[arg(short = 'd', long, default_value = "synthetic")]
    device: String,
    #[arg(short = 'C', long, default_value_t = 0)]
    channel: usize,
    #[arg(short = 'A', long)]
    antenna: Option<String>,
    /// Gain in dB
    #[arg(short = 'g', long, conflicts_with = "agc")]
    gain: Option<f64>,
    /// Automatic gain control
    #[arg(short = 'a', long)]
    agc: bool,
    /// Driver settings as key=value,...
    #[arg(long)]
    device_settings: Option<String>,
    /// Sample rate (k/M/G suffixes allowed)
    #[arg(short = 'r', long, value_parser = parse_frequency, default_value = "2M")]
    rate: f64,
    /// Hardware filter bandwidth; 0 keeps the driver default
    #[arg(short = 'w', long, value_parser = parse_frequency, default_value = "0")]
    bandwidth: f64,
    /// Frequency correction in ppm
    #[arg(short = 'p', long, default_value_t = 0, allow_negative_numbers = true)]
    ppm: i32,
    /// LNB local oscillator frequency, subtracted before tuning
    #[arg(long, value_parser = parse_frequency, default_value = "0")]
    lnb_lo: f64,

    /// Percent of overlap between adjacent hops
    #[arg(short = 'o', long, conflicts_with = "crop")]
    overlap: Option<f64>,
    /// Percent of bins cropped at the hop edges
    #[arg(short = 'k', long)]
    crop: Option<f64>,
    /// Require an even number of FFT bins
    #[arg(long)]
    even: bool,
    /// Require a power-of-two number of FFT bins
    #[arg(long)]
    pow2: bool,

    /// Samples per buffer: 0 automatic, -1 unlimited
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    max_buffer_size: i64,
    /// PSD worker threads; 0 uses every core
    #[arg(long, default_value_t = 0)]
    max_threads: usize,
    /// Buffers in flight: 0 is twice the thread count, -1 unlimited
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    max_queue_size: i64,

    /// Window: boxcar, hann, hamming, blackman, bartlett, kaiser, tukey
    #[arg(long, default_value = "hann")]
    fft_window: String,
    /// Shape parameter for kaiser (beta) or tukey (alpha)
    #[arg(long)]
    fft_window_param: Option<f64>,
    /// Percent of overlap between FFT segments
    #[arg(long, default_value_t = 50.0)]
    fft_overlap: f64,
    /// Report linear power instead of dB
    #[arg(long)]
    linear: bool,
    /// Replace the DC bin with the mean of its neighbours
    #[arg(long)]
    remove_dc: bool,
    /// Subtract the segment mean before the FFT
    #[arg(long)]
    detrend: bool,
    /// Transform backends in order of preference
    #[arg(long, value_delimiter = ',', default_value = "avx,sse,neon,scalar,dft")]
    backend: Vec<TransformBackend>,

    /// Detection threshold in dBm
    #[arg(short = 'l', long, default_value_t = -85.0, allow_negative_numbers = true)]
    threshold: f64,
    /// Send each detection as JSON over UDP to this host
    #[arg(short = 's', long)]
    server: Option<String>,
    #[arg(short = 'P', long, default_value_t = 2048)]
    port: u16,
    /// Output file; `-` or absent writes to stdout
    #[arg(short = 'O', long)]
    output: Option<PathBuf>,
    #[arg(short = 'F', long, value_enum, default_value_t = OutputFormat::RtlPower)]
    format: OutputFormat,
    /// Serve /detection and /summary over HTTP on this address
    #[arg(long)]
    serve: Option<SocketAddr>,
    /// Write a time/frequency PNG plot per detection
    #[arg(long)]
    plot: bool,
    /// Directory for plots, defaults to the system temp directory
    #[arg(long, requires = "plot")]
    plot_dir: Option<PathBuf>,

    /// Seconds to wait after retuning
    #[arg(long, default_value_t = 0.0)]
    tune_delay: f64,
    /// Stop and restart the stream around every retune
    #[arg(long)]
    reset_stream: bool,
    /// Retries of a failed read before the hop fails
    #[arg(long, default_value_t = 3)]
    read_retries: usize,
    /// Skip hops whose reads keep failing instead of aborting
    #[arg(long)]
    skip_failed_hops: bool,

    /// Synthetic tone FREQ:DBM, repeatable
    #[arg(long = "tone", allow_hyphen_values = true)]
    tones: Vec<Tone>,
    /// Synthetic noise power per sample in dBm
    #[arg(long, default_value_t = -110.0, allow_negative_numbers = true)]
    noise: f64,
    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[arg(long, conflicts_with = "quiet")]
    debug: bool,
    #[arg(short = 'q', long)]
    quiet: bool,
}

impl Args {
    fn sweep_config(&self) -> anyhow::Result<SweepConfig> {
        if let Some(path) = &self.config {
            return SweepConfig::load(path);
        }
        let (low, high) = self
            .freq
            .context("a frequency range (--freq LOW:HIGH) or --config is required")?;
        let mut config = SweepConfig {
            low,
            high,
            sample_rate: self.rate,
            bins: self.bins,
            bin_size: self.bin_size,
            repeats: self.repeats,
            time: self.time,
            total_time: self.total_time,
            continuous: self.continuous,
            runs: self.runs,
            elapsed: self.elapsed,
            overlap: self.overlap,
            crop: self.crop,
            even: self.even,
            pow2: self.pow2,
            lnb_lo: self.lnb_lo,
            device: self.device.clone(),
            max_buffer_size: self.max_buffer_size,
            max_queue_size: self.max_queue_size,
            max_threads: self.max_threads,
            fft_window: self.fft_window.clone(),
            fft_window_param: self.fft_window_param,
            fft_overlap: self.fft_overlap,
            linear: self.linear,
            remove_dc: self.remove_dc,
            detrend: self.detrend,
            backends: self.backend.clone(),
            threshold: self.threshold,
            tune_delay: self.tune_delay,
            reset_stream: self.reset_stream,
            read_retries: self.read_retries,
            skip_failed_hops: self.skip_failed_hops,
            format: self.format,
            output: self.output.clone(),
            server: self.server.clone(),
            port: self.port,
            serve: self.serve,
            plot: self.plot,
            plot_dir: self.plot_dir.clone(),
            tones: self.tones.clone(),
            noise_dbm: Some(self.noise),
            seed: self.seed,
            ..Default::default()
        };
        config.device_settings.channel = self.channel;
        config.device_settings.antenna = self.antenna.clone();
        config.device_settings.gain = self.gain;
        config.device_settings.agc = self.agc;
        config.device_settings.bandwidth = self.bandwidth;
        config.device_settings.ppm = self.ppm;
        config.device_settings.settings = self.device_settings.clone();
        Ok(config)
    }
}

fn init_logging(args: &Args) {
    let level = if args.debug {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// Raises `shutdown` on Ctrl+C or SIGTERM.
fn watch_signals(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    let runtime = TokioBuilder::new_current_thread()
        .enable_all()
        .build()
        .context("creating runtime for signal handling")?;
    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            runtime.block_on(async {
                wait_for_termination().await;
                info!("shutdown requested, finishing current buffer");
                shutdown.store(true, Ordering::SeqCst);
            });
        })
        .context("spawning signal thread")?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination() {
    let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!("cannot watch SIGTERM: {}", err);
            let _ = signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = signal::ctrl_c().await;
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = args.sweep_config()?;
    let shutdown = Arc::new(AtomicBool::new(false));
    watch_signals(shutdown.clone())?;

    let summary = Runner::new(config).execute(&shutdown)?;
    info!(
        "finished {} sweep(s) with {} detection(s) in {:.3} s",
        summary.sweeps, summary.metrics.detections, summary.elapsed
    );
    Ok(())
}
