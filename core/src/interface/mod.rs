pub mod detection;
pub mod device;
pub mod samples;
pub mod sink;

pub use detection::DetectionRecord;
pub use device::{DeviceError, SampleSource};
pub use samples::{PsdPartial, PsdResult, SampleBuffer};
pub use sink::{CollectingSink, RecordSink};
