use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Sender;
use log::{debug, error};

use crate::interface::samples::PsdPartial;
use crate::prelude::{SweepError, SweepResult};
use crate::processing::buffer_pool::BufferPool;
use crate::processing::psd::PsdEstimator;
use crate::processing::queue::BufferConsumer;
use crate::telemetry::metrics::MetricsRecorder;

/// Fixed set of threads draining the buffer queue into PSD partials.
///
/// Results are sent as soon as each buffer is processed, so they arrive in
/// completion order rather than hop order.
pub struct PsdWorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl PsdWorkerPool {
    /// `0` sizes the pool to the available parallelism.
    pub fn resolve_threads(requested: usize) -> usize {
        if requested > 0 {
            return requested;
        }
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn spawn(
        threads: usize,
        queue: BufferConsumer,
        estimator: Arc<PsdEstimator>,
        pool: Arc<BufferPool>,
        results: Sender<PsdPartial>,
        metrics: Arc<MetricsRecorder>,
    ) -> SweepResult<Self> {
        let mut handles = Vec::with_capacity(threads);
        for id in 0..threads.max(1) {
            let queue = queue.clone();
            let estimator = estimator.clone();
            let pool = pool.clone();
            let results = results.clone();
            let metrics = metrics.clone();
            let handle = thread::Builder::new()
                .name(format!("psd-worker-{id}"))
                .spawn(move || worker_loop(id, queue, &estimator, &pool, results, &metrics))
                .map_err(|err| SweepError::Internal(format!("spawning PSD worker: {err}")))?;
            handles.push(handle);
        }
        Ok(Self { handles })
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Waits for every worker; the queue producer must be dropped first.
    pub fn join(mut self) -> SweepResult<()> {
        self.join_all()
    }

    fn join_all(&mut self) -> SweepResult<()> {
        let mut panicked = 0;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            error!("{} PSD worker(s) panicked", panicked);
            return Err(SweepError::Internal(format!("{panicked} PSD worker(s) panicked")));
        }
        Ok(())
    }
}

impl Drop for PsdWorkerPool {
    fn drop(&mut self) {
        let _ = self.join_all();
    }
}

fn worker_loop(
    id: usize,
    queue: BufferConsumer,
    estimator: &PsdEstimator,
    pool: &BufferPool,
    results: Sender<PsdPartial>,
    metrics: &MetricsRecorder,
) {
    let mut fft = estimator.fft_helper();
    let mut segment = Vec::with_capacity(estimator.bins());
    while let Some(buffer) = queue.pop() {
        let partial = estimator.accumulate(&buffer, &mut fft, &mut segment);
        pool.release(buffer.samples);
        metrics.record_processed();
        if results.send(partial).is_err() {
            break;
        }
    }
    debug!("PSD worker {} exiting", id);
}
