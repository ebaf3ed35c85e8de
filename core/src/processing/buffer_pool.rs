use std::sync::{Mutex, PoisonError};

use num_complex::Complex32;

/// Recycles sample buffers between the acquisition path and the PSD workers.
///
/// At most `max_capacity` idle buffers are retained; beyond that released
/// buffers are dropped.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<Complex32>>>,
    max_capacity: usize,
}

impl BufferPool {
    pub fn with_capacity(max_capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_capacity)),
            max_capacity,
        }
    }

    /// Takes an idle buffer from the pool or allocates one, zeroed to `length`.
    pub fn checkout(&self, length: usize) -> Vec<Complex32> {
        let recycled = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match recycled {
            Some(mut buffer) => {
                buffer.clear();
                buffer.resize(length, Complex32::new(0.0, 0.0));
                buffer
            }
            None => vec![Complex32::new(0.0, 0.0); length],
        }
    }

    /// Returns a buffer back to the pool for reuse.
    pub fn release(&self, buffer: Vec<Complex32>) {
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() < self.max_capacity {
            buffers.push(buffer);
        }
    }

    pub fn idle(&self) -> usize {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
