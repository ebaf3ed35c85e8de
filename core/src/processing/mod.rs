pub mod buffer_pool;
pub mod detector;
pub mod hop_plan;
pub mod psd;
pub mod queue;
pub mod stitcher;
pub mod workers;

pub use buffer_pool::BufferPool;
pub use detector::SignalDetector;
pub use hop_plan::{Hop, HopPlan, HopPlanRequest, HopPlanner};
pub use psd::{HopCollector, PsdEstimator, SpectralSettings};
pub use queue::{BufferConsumer, BufferLayout, BufferProducer, BufferQueue, SizeLimit};
pub use stitcher::{SpectrumStitcher, StitchedSpectrum};
pub use workers::PsdWorkerPool;
