use crate::interface::detection::DetectionRecord;
use crate::prelude::SweepResult;

/// Destination for detection records produced by a session.
///
/// Errors returned here are logged by the session and never stop acquisition.
pub trait RecordSink {
    fn emit(&mut self, record: &DetectionRecord) -> SweepResult<()>;

    /// Called once after each completed sweep, with or without a detection.
    fn end_of_sweep(&mut self) -> SweepResult<()> {
        Ok(())
    }
}

/// Sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub records: Vec<DetectionRecord>,
    pub sweeps: usize,
}

impl RecordSink for CollectingSink {
    fn emit(&mut self, record: &DetectionRecord) -> SweepResult<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn end_of_sweep(&mut self) -> SweepResult<()> {
        self.sweeps += 1;
        Ok(())
    }
}
