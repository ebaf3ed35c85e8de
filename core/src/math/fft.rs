use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{info, warn};
use num_complex::{Complex32, Complex64};
use rustfft::{
    num_traits::Zero, Fft, FftPlannerAvx, FftPlannerNeon, FftPlannerScalar, FftPlannerSse,
};
use serde::{Deserialize, Serialize};

use crate::prelude::{SweepError, SweepResult};

/// Transform implementations in their default order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformBackend {
    Avx,
    Sse,
    Neon,
    Scalar,
    /// Direct O(n²) DFT, always available.
    Dft,
}

impl TransformBackend {
    pub const PREFERENCE: [TransformBackend; 5] = [
        TransformBackend::Avx,
        TransformBackend::Sse,
        TransformBackend::Neon,
        TransformBackend::Scalar,
        TransformBackend::Dft,
    ];
}

impl fmt::Display for TransformBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransformBackend::Avx => "avx",
            TransformBackend::Sse => "sse",
            TransformBackend::Neon => "neon",
            TransformBackend::Scalar => "scalar",
            TransformBackend::Dft => "dft",
        };
        f.write_str(name)
    }
}

impl FromStr for TransformBackend {
    type Err = SweepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "avx" => Ok(TransformBackend::Avx),
            "sse" => Ok(TransformBackend::Sse),
            "neon" => Ok(TransformBackend::Neon),
            "scalar" => Ok(TransformBackend::Scalar),
            "dft" => Ok(TransformBackend::Dft),
            other => Err(SweepError::config(format!("unknown transform backend {other}"))),
        }
    }
}

#[derive(Clone)]
enum Plan {
    Fft(Arc<dyn Fft<f32>>),
    Dft(Arc<Vec<Complex64>>),
}

/// Forward transform of a fixed size, resolved once per session and shared by
/// every PSD worker.
#[derive(Clone)]
pub struct TransformContext {
    backend: TransformBackend,
    size: usize,
    plan: Plan,
}

impl fmt::Debug for TransformContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformContext")
            .field("backend", &self.backend)
            .field("size", &self.size)
            .finish()
    }
}

impl TransformContext {
    /// Picks the first available backend from `preferences`.
    pub fn resolve(preferences: &[TransformBackend], size: usize) -> SweepResult<Self> {
        if size == 0 {
            return Err(SweepError::config("transform size must be positive"));
        }
        for &backend in preferences {
            match Self::plan(backend, size) {
                Some(plan) => {
                    info!("transform backend: {} ({} points)", backend, size);
                    return Ok(Self {
                        backend,
                        size,
                        plan,
                    });
                }
                None => warn!("transform backend {} unavailable, trying next", backend),
            }
        }
        Err(SweepError::Compute(format!(
            "no transform backend available among {:?}",
            preferences
        )))
    }

    fn plan(backend: TransformBackend, size: usize) -> Option<Plan> {
        let fft = match backend {
            TransformBackend::Avx => FftPlannerAvx::<f32>::new().ok()?.plan_fft_forward(size),
            TransformBackend::Sse => FftPlannerSse::<f32>::new().ok()?.plan_fft_forward(size),
            TransformBackend::Neon => FftPlannerNeon::<f32>::new().ok()?.plan_fft_forward(size),
            TransformBackend::Scalar => FftPlannerScalar::<f32>::new().plan_fft_forward(size),
            TransformBackend::Dft => {
                let twiddles = (0..size)
                    .map(|m| Complex64::from_polar(1.0, -2.0 * PI * m as f64 / size as f64))
                    .collect();
                return Some(Plan::Dft(Arc::new(twiddles)));
            }
        };
        Some(Plan::Fft(fft))
    }

    pub fn backend(&self) -> TransformBackend {
        self.backend
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Per-worker transform state: the shared plan plus private scratch space.
pub struct FftHelper {
    context: TransformContext,
    scratch: Vec<Complex32>,
}

impl FftHelper {
    pub fn new(context: TransformContext) -> Self {
        let scratch_len = match &context.plan {
            Plan::Fft(fft) => fft.get_inplace_scratch_len(),
            Plan::Dft(_) => context.size,
        };
        let scratch = vec![Complex32::zero(); scratch_len];
        Self { context, scratch }
    }

    /// In-place forward transform; `buffer` must match the planned size.
    pub fn forward(&mut self, buffer: &mut [Complex32]) {
        debug_assert_eq!(buffer.len(), self.context.size);
        match &self.context.plan {
            Plan::Fft(fft) => fft.process_with_scratch(buffer, &mut self.scratch),
            Plan::Dft(twiddles) => {
                let n = buffer.len();
                self.scratch.copy_from_slice(buffer);
                for (k, out) in buffer.iter_mut().enumerate() {
                    let mut acc = Complex64::zero();
                    for (i, x) in self.scratch.iter().enumerate() {
                        let x = Complex64::new(x.re as f64, x.im as f64);
                        acc += x * twiddles[(k * i) % n];
                    }
                    *out = Complex32::new(acc.re as f32, acc.im as f32);
                }
            }
        }
    }
}
