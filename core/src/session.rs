//! Sweep session: owns the device, feeds the worker pool and turns each full
//! hop cycle into at most one detection record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam::channel::{self, Receiver};
use log::{debug, error, info, warn};
use num_complex::Complex32;
use serde::Serialize;

use crate::interface::detection::DetectionRecord;
use crate::interface::device::{DeviceError, SampleSource};
use crate::interface::samples::{PsdPartial, SampleBuffer};
use crate::interface::sink::RecordSink;
use crate::math::fft::{TransformBackend, TransformContext};
use crate::prelude::{AveragingTarget, StopPolicy, SweepError, SweepResult};
use crate::processing::buffer_pool::BufferPool;
use crate::processing::detector::SignalDetector;
use crate::processing::hop_plan::{Hop, HopPlan, HopPlanRequest, HopPlanner};
use crate::processing::psd::{HopCollector, PsdEstimator, SpectralSettings};
use crate::processing::queue::{BufferLayout, BufferProducer, BufferQueue, SizeLimit};
use crate::processing::stitcher::SpectrumStitcher;
use crate::processing::workers::PsdWorkerPool;
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::{MetricsRecorder, MetricsSnapshot};

/// Frequencies closer than this are treated as already tuned.
const TUNE_TOLERANCE_HZ: f64 = 1.0;

pub const DEFAULT_READ_RETRIES: usize = 3;
pub const DEFAULT_THRESHOLD_DBM: f64 = -85.0;

/// Everything a session needs besides the device and the sink.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `plan.sample_rate` is the requested rate; the device's actual rate wins.
    pub plan: HopPlanRequest,
    pub averaging: AveragingTarget,
    pub stop: StopPolicy,
    pub spectral: SpectralSettings,
    pub backends: Vec<TransformBackend>,
    /// `0` uses the available parallelism.
    pub threads: usize,
    pub max_queue_size: SizeLimit,
    pub max_buffer_size: SizeLimit,
    /// Seconds to wait after retuning before capturing.
    pub tune_delay: f64,
    pub reset_stream: bool,
    pub threshold_dbm: f64,
    pub read_retries: usize,
    /// Skip a hop whose reads keep failing instead of aborting the session.
    pub skip_failed_hops: bool,
}

impl SessionConfig {
    pub fn new(plan: HopPlanRequest) -> Self {
        Self {
            plan,
            averaging: AveragingTarget::default(),
            stop: StopPolicy::Runs(1),
            spectral: SpectralSettings::default(),
            backends: TransformBackend::PREFERENCE.to_vec(),
            threads: 0,
            max_queue_size: SizeLimit::Auto,
            max_buffer_size: SizeLimit::Auto,
            tune_delay: 0.0,
            reset_stream: false,
            threshold_dbm: DEFAULT_THRESHOLD_DBM,
            read_retries: DEFAULT_READ_RETRIES,
            skip_failed_hops: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub sweeps: u64,
    pub elapsed: f64,
    pub threads: usize,
    pub queue_high_water: usize,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug)]
enum SweepOutcome {
    Completed(Option<DetectionRecord>),
    /// Some hop failed or went missing; no record.
    Incomplete,
    Interrupted,
}

enum HopStatus {
    Captured,
    Interrupted,
}

pub struct SessionOrchestrator {
    config: SessionConfig,
    plan: HopPlan,
    layout: BufferLayout,
    estimator: Arc<PsdEstimator>,
    detector: SignalDetector,
    metrics: Arc<MetricsRecorder>,
    threads: usize,
    log: LogManager,
}

impl SessionOrchestrator {
    /// Plans the sweep against the device's actual sample rate and stream MTU.
    pub fn new(config: SessionConfig, source: &dyn SampleSource) -> SweepResult<Self> {
        if !config.tune_delay.is_finite() || config.tune_delay < 0.0 {
            return Err(SweepError::config(format!(
                "tune delay must be a finite, non-negative number of seconds, got {}",
                config.tune_delay
            )));
        }
        let sample_rate = source.sample_rate();
        if config.plan.sample_rate > 0.0 && (sample_rate - config.plan.sample_rate).abs() > 1.0 {
            warn!(
                "device sample rate {:.0} Hz differs from requested {:.0} Hz",
                sample_rate, config.plan.sample_rate
            );
        }
        let request = HopPlanRequest {
            sample_rate,
            ..config.plan.clone()
        };
        let plan = HopPlanner::plan(&request)?;
        let repeats = config.averaging.repeats(sample_rate, plan.bins, plan.len())?;
        let layout = BufferLayout::new(
            plan.bins,
            repeats,
            source.stream_mtu(),
            config.max_buffer_size,
        )?;
        let transform = TransformContext::resolve(&config.backends, plan.bins)?;
        let estimator =
            PsdEstimator::new(plan.bins, sample_rate, config.spectral.clone(), transform)?;
        let threads = PsdWorkerPool::resolve_threads(config.threads);

        let log = LogManager::new();
        log.hop_plan(&plan, config.threshold_dbm);
        log.buffer_layout(&layout, sample_rate);

        Ok(Self {
            detector: SignalDetector::new(config.threshold_dbm),
            config,
            plan,
            layout,
            estimator: Arc::new(estimator),
            metrics: Arc::new(MetricsRecorder::new()),
            threads,
            log,
        })
    }

    pub fn plan(&self) -> &HopPlan {
        &self.plan
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        self.metrics.clone()
    }

    /// Sweeps until the stop policy is met or `shutdown` is raised.
    pub fn run(
        &self,
        source: &mut dyn SampleSource,
        sink: &mut dyn RecordSink,
        shutdown: &AtomicBool,
    ) -> SweepResult<SessionSummary> {
        let capacity = self.config.max_queue_size.queue_capacity(self.threads);
        let (producer, consumer) = BufferQueue::new(capacity)?;
        let queue_stats = producer.stats();
        let (result_tx, result_rx) = channel::unbounded();
        let pool = Arc::new(BufferPool::with_capacity(
            capacity.unwrap_or(2 * self.threads) + self.threads,
        ));

        source.activate()?;
        let workers = PsdWorkerPool::spawn(
            self.threads,
            consumer,
            self.estimator.clone(),
            pool.clone(),
            result_tx,
            self.metrics.clone(),
        )?;
        info!("{} PSD worker(s), queue capacity {:?}", workers.threads(), capacity);

        let started = Instant::now();
        let mut sweeps = 0u64;
        let mut failure = None;
        while self.keep_sweeping(sweeps, started) {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            match self.run_sweep(source, &producer, &result_rx, &pool, shutdown) {
                Ok(SweepOutcome::Completed(record)) => {
                    sweeps += 1;
                    self.metrics.record_sweep(true);
                    if let Some(record) = record {
                        self.metrics.record_detection();
                        info!(
                            "sweep {}: {:.3} MHz, {:.1} dBm, {:.0} kHz",
                            sweeps, record.peak_frequency_mhz, record.rssi_dbm, record.bandwidth_khz
                        );
                        if let Err(err) = sink.emit(&record) {
                            error!("emitting detection record failed: {}", err);
                            self.metrics.record_output_error();
                        }
                    }
                    if let Err(err) = sink.end_of_sweep() {
                        error!("finishing sweep output failed: {}", err);
                        self.metrics.record_output_error();
                    }
                }
                Ok(SweepOutcome::Incomplete) => {
                    sweeps += 1;
                    self.metrics.record_sweep(false);
                }
                Ok(SweepOutcome::Interrupted) => {
                    self.log.record("sweep interrupted, partial results discarded");
                    break;
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        drop(producer);
        let joined = workers.join();
        if let Err(err) = source.deactivate() {
            warn!("deactivating stream failed: {}", err);
        }
        if let Some(err) = failure {
            return Err(err);
        }
        joined?;

        let summary = SessionSummary {
            sweeps,
            elapsed: started.elapsed().as_secs_f64(),
            threads: self.threads,
            queue_high_water: queue_stats.high_water(),
            metrics: self.metrics.snapshot(),
        };
        self.log
            .summary(&summary.metrics, summary.elapsed, summary.queue_high_water);
        Ok(summary)
    }

    fn keep_sweeping(&self, sweeps: u64, started: Instant) -> bool {
        match self.config.stop {
            StopPolicy::Continuous => true,
            StopPolicy::Runs(runs) => sweeps < runs,
            StopPolicy::Elapsed(limit) => sweeps == 0 || started.elapsed().as_secs_f64() < limit,
        }
    }

    fn run_sweep(
        &self,
        source: &mut dyn SampleSource,
        producer: &BufferProducer,
        results: &Receiver<PsdPartial>,
        pool: &BufferPool,
        shutdown: &AtomicBool,
    ) -> SweepResult<SweepOutcome> {
        let mut collector = HopCollector::new(&self.estimator);
        let mut stitcher = SpectrumStitcher::new(&self.plan, self.estimator.settings().log_scale);
        let mut pushed = 0usize;
        let mut received = 0usize;
        let mut interrupted = false;
        let mut skipped = false;
        let mut failure = None;

        for hop in self.plan.hops() {
            if shutdown.load(Ordering::Relaxed) {
                interrupted = true;
                break;
            }
            match self.acquire_hop(source, hop, producer, pool, shutdown, &mut pushed) {
                Ok(HopStatus::Captured) => {}
                Ok(HopStatus::Interrupted) => {
                    interrupted = true;
                    break;
                }
                Err(SweepError::Device(err)) if self.config.skip_failed_hops => {
                    error!("hop {} failed, skipping: {}", hop.index, err);
                    self.metrics.record_failed_hop();
                    skipped = true;
                }
                Err(err) => {
                    if matches!(err, SweepError::Device(_)) {
                        self.metrics.record_failed_hop();
                    }
                    failure = Some(err);
                    break;
                }
            }
            while let Ok(partial) = results.try_recv() {
                received += 1;
                self.absorb(partial, &mut collector, &mut stitcher)?;
            }
        }

        while received < pushed {
            let partial = results
                .recv()
                .map_err(|_| SweepError::Internal("PSD workers exited mid-sweep".into()))?;
            received += 1;
            self.absorb(partial, &mut collector, &mut stitcher)?;
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if interrupted {
            return Ok(SweepOutcome::Interrupted);
        }
        if skipped {
            warn!("sweep discarded after failed hop(s)");
            return Ok(SweepOutcome::Incomplete);
        }
        match stitcher.finish() {
            Ok(spectrum) => Ok(SweepOutcome::Completed(self.detector.detect(&spectrum))),
            Err(err) => {
                warn!("sweep discarded: {}", err);
                Ok(SweepOutcome::Incomplete)
            }
        }
    }

    fn absorb(
        &self,
        partial: PsdPartial,
        collector: &mut HopCollector,
        stitcher: &mut SpectrumStitcher,
    ) -> SweepResult<()> {
        if let Some(result) = collector.absorb(partial) {
            self.metrics.record_hop();
            stitcher.insert(result)?;
        }
        Ok(())
    }

    fn acquire_hop(
        &self,
        source: &mut dyn SampleSource,
        hop: &Hop,
        producer: &BufferProducer,
        pool: &BufferPool,
        shutdown: &AtomicBool,
        pushed: &mut usize,
    ) -> SweepResult<HopStatus> {
        if (source.frequency() - hop.tune_frequency).abs() > TUNE_TOLERANCE_HZ {
            if self.config.reset_stream {
                source.deactivate()?;
            }
            source.set_frequency(hop.tune_frequency)?;
            if self.config.reset_stream {
                source.activate()?;
            }
            if self.config.tune_delay > 0.0 {
                thread::sleep(Duration::from_secs_f64(self.config.tune_delay));
            }
        }

        let started = Instant::now();
        let parts = self.layout.buffers_per_hop;
        for part in 0..parts {
            if shutdown.load(Ordering::Relaxed) {
                return Ok(HopStatus::Interrupted);
            }
            let mut samples = pool.checkout(self.layout.buffer_size);
            let capture_start = Utc::now();
            if let Err(err) = self.read_with_retries(source, &mut samples) {
                pool.release(samples);
                return Err(err.into());
            }
            producer.push(SampleBuffer {
                hop_index: hop.index,
                center_frequency: hop.center_frequency,
                part,
                parts,
                capture_start,
                samples,
            })?;
            *pushed += 1;
        }
        debug!(
            "hop {} at {:.3} MHz captured in {:.3} ms",
            hop.index,
            hop.center_frequency / 1e6,
            started.elapsed().as_secs_f64() * 1e3
        );
        Ok(HopStatus::Captured)
    }

    fn read_with_retries(
        &self,
        source: &mut dyn SampleSource,
        buffer: &mut [Complex32],
    ) -> Result<(), DeviceError> {
        let mut attempt = 0;
        loop {
            match source.read(buffer) {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.config.read_retries => {
                    attempt += 1;
                    self.metrics.record_retry();
                    warn!(
                        "read failed ({}), retry {}/{}",
                        err, attempt, self.config.read_retries
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
}
