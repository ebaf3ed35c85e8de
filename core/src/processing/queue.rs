use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::interface::samples::SampleBuffer;
use crate::prelude::{SweepError, SweepResult};

/// Roughly 100 MiB of complex64 samples.
pub const AUTO_MAX_BUFFER_SAMPLES: usize = 100 * 1024 * 1024 / 8;

/// Size cap as configured by the user: `0` automatic, `-1` unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeLimit {
    #[default]
    Auto,
    Unlimited,
    Bounded(usize),
}

impl SizeLimit {
    pub fn from_setting(value: i64) -> SweepResult<Self> {
        match value {
            0 => Ok(SizeLimit::Auto),
            -1 => Ok(SizeLimit::Unlimited),
            n if n > 0 => Ok(SizeLimit::Bounded(n as usize)),
            n => Err(SweepError::config(format!(
                "size limit must be -1, 0 or positive, got {n}"
            ))),
        }
    }

    /// Queue capacity in buffers; `None` means unbounded.
    pub fn queue_capacity(&self, threads: usize) -> Option<usize> {
        match *self {
            SizeLimit::Auto => Some(2 * threads.max(1)),
            SizeLimit::Unlimited => None,
            SizeLimit::Bounded(n) => Some(n),
        }
    }
}

/// How many samples are read per buffer, and how many buffers make up one hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub bins: usize,
    pub repeats: usize,
    pub buffer_size: usize,
    pub buffers_per_hop: usize,
    pub max_buffer_size: Option<usize>,
}

impl BufferLayout {
    pub fn new(bins: usize, repeats: usize, mtu: usize, limit: SizeLimit) -> SweepResult<Self> {
        let mtu = mtu.max(1);
        let samples = bins
            .checked_mul(repeats)
            .ok_or_else(|| SweepError::config("bins * repeats overflows"))?;
        let mut buffer_size = samples.div_ceil(mtu) * mtu;
        let max_buffer_size = match limit {
            SizeLimit::Auto => Some(AUTO_MAX_BUFFER_SAMPLES),
            SizeLimit::Unlimited => None,
            SizeLimit::Bounded(n) => Some(n),
        }
        .map(|max| max.div_ceil(mtu) * mtu);

        let mut buffers_per_hop = 1;
        if let Some(max) = max_buffer_size {
            if buffer_size > max {
                log::warn!(
                    "required buffer size ({}) will be shrunk to max_buffer_size ({})",
                    buffer_size,
                    max
                );
                buffers_per_hop = buffer_size.div_ceil(max);
                buffer_size = max;
            }
        }
        if buffer_size < bins {
            return Err(SweepError::config(format!(
                "buffer of {buffer_size} samples cannot hold one {bins}-bin segment"
            )));
        }

        Ok(Self {
            bins,
            repeats,
            buffer_size,
            buffers_per_hop,
            max_buffer_size,
        })
    }

    pub fn samples_per_hop(&self) -> usize {
        self.buffer_size * self.buffers_per_hop
    }
}

#[derive(Debug)]
pub struct QueueStats {
    capacity: Option<usize>,
    high_water: AtomicUsize,
}

impl QueueStats {
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Largest number of buffers observed waiting in the queue.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }
}

/// Bounded FIFO of captured buffers between acquisition and the PSD workers.
pub struct BufferQueue;

impl BufferQueue {
    /// Creates the queue; `None` capacity is unbounded. Dropping the producer
    /// closes the queue once it drains.
    pub fn new(capacity: Option<usize>) -> SweepResult<(BufferProducer, BufferConsumer)> {
        let (tx, rx) = match capacity {
            Some(0) => return Err(SweepError::config("queue capacity must be at least 1")),
            Some(n) => channel::bounded(n),
            None => channel::unbounded(),
        };
        let stats = Arc::new(QueueStats {
            capacity,
            high_water: AtomicUsize::new(0),
        });
        Ok((
            BufferProducer {
                tx,
                stats: stats.clone(),
            },
            BufferConsumer { rx, stats },
        ))
    }
}

pub struct BufferProducer {
    tx: Sender<SampleBuffer>,
    stats: Arc<QueueStats>,
}

impl BufferProducer {
    /// Blocks while the queue is full.
    pub fn push(&self, buffer: SampleBuffer) -> SweepResult<()> {
        self.tx
            .send(buffer)
            .map_err(|_| SweepError::Internal("all PSD workers have exited".into()))?;
        self.stats
            .high_water
            .fetch_max(self.tx.len(), Ordering::Relaxed);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        self.stats.clone()
    }
}

#[derive(Clone)]
pub struct BufferConsumer {
    rx: Receiver<SampleBuffer>,
    stats: Arc<QueueStats>,
}

impl BufferConsumer {
    /// Blocks until a buffer arrives; `None` once the producer is gone and the
    /// queue is drained.
    pub fn pop(&self) -> Option<SampleBuffer> {
        self.rx.recv().ok()
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        self.stats.clone()
    }
}
