use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sweepcore::interface::DetectionRecord;

/// State served by the status bridge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusModel {
    pub latest_detection: Option<DetectionRecord>,
    pub completed_sweeps: u64,
    pub detections: u64,
    pub last_update: Option<DateTime<Utc>>,
}

impl StatusModel {
    pub fn record_detection(&mut self, record: &DetectionRecord) {
        self.latest_detection = Some(record.clone());
        self.detections += 1;
        self.last_update = Some(Utc::now());
    }

    pub fn record_sweep(&mut self) {
        self.completed_sweeps += 1;
        self.last_update = Some(Utc::now());
    }
}
