pub mod fft;
pub mod stats;
pub mod window;

pub use fft::{FftHelper, TransformBackend, TransformContext};
pub use stats::StatsHelper;
pub use window::WindowFunction;
