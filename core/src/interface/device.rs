use num_complex::Complex32;

/// Failure reported by a sample source.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("stream overflow")]
    Overflow,
    #[error("read timed out")]
    Timeout,
    #[error("tuning to {frequency:.0} Hz failed: {reason}")]
    Tune { frequency: f64, reason: String },
    #[error("{0}")]
    Driver(String),
}

/// Receiver the acquisition path tunes and reads from.
///
/// A source is owned by exactly one thread for the lifetime of a session and is
/// never shared with the PSD workers.
pub trait SampleSource: Send {
    /// Actual sample rate in Hz after the driver applied its settings.
    fn sample_rate(&self) -> f64;

    /// Currently tuned center frequency in Hz.
    fn frequency(&self) -> f64;

    fn set_frequency(&mut self, frequency: f64) -> Result<(), DeviceError>;

    /// Native stream transfer size in samples; buffers are sized in multiples of it.
    fn stream_mtu(&self) -> usize {
        1
    }

    fn activate(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Fills `buffer` completely with consecutive samples.
    fn read(&mut self, buffer: &mut [Complex32]) -> Result<(), DeviceError>;
}
