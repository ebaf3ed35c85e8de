//! Core of the hop-sweeping spectrum detector.
//!
//! A session tunes one receiver across a frequency range, estimates a Welch
//! PSD per hop on a fixed worker pool, stitches the hops into one spectrum and
//! reports the strongest signal above a threshold.

pub mod interface;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod session;
pub mod telemetry;

pub use interface::{DetectionRecord, RecordSink, SampleSource};
pub use prelude::{SweepError, SweepResult};
pub use session::{SessionConfig, SessionOrchestrator, SessionSummary};
