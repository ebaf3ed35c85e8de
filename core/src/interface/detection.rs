use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const REPORT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Strongest signal found in one stitched sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub report_time: DateTime<Utc>,
    pub peak_frequency_mhz: f64,
    pub bandwidth_khz: f64,
    /// Whole stitched spectrum, truncated to integer dBm.
    pub psd: Vec<i32>,
    pub span_mhz: (f64, f64),
    pub duration_ms: f64,
    pub rssi_dbm: f64,
    pub bin_width_hz: f64,
    /// Samples captured across all hops of the sweep.
    pub sample_count: u64,
    /// Time-domain magnitude at the start of the hop holding the peak.
    #[serde(default)]
    pub magnitude_trace: Vec<f32>,
}

/// Wire shape of the JSON record.
#[derive(Debug, Serialize)]
struct JsonRecord<'a> {
    #[serde(rename = "reportTime")]
    report_time: String,
    #[serde(rename = "frequencyMHz")]
    frequency_mhz: f64,
    #[serde(rename = "bandwidthKHz")]
    bandwidth_khz: i64,
    psd: &'a [i32],
    #[serde(rename = "spanMHz")]
    span_mhz: [f64; 2],
    #[serde(rename = "durationMs")]
    duration_ms: f64,
    #[serde(rename = "rssidBm")]
    rssi_dbm: f64,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

impl DetectionRecord {
    pub fn report_time_string(&self) -> String {
        self.report_time.format(REPORT_TIME_FORMAT).to_string()
    }

    /// Renders the fixed JSON form sent to the collector.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let wire = JsonRecord {
            report_time: self.report_time_string(),
            frequency_mhz: round_to(self.peak_frequency_mhz, 3),
            bandwidth_khz: self.bandwidth_khz.trunc() as i64,
            psd: &self.psd,
            span_mhz: [round_to(self.span_mhz.0, 3), round_to(self.span_mhz.1, 3)],
            duration_ms: round_to(self.duration_ms, 3),
            rssi_dbm: round_to(self.rssi_dbm, 1),
        };
        serde_json::to_string_pretty(&wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> DetectionRecord {
        DetectionRecord {
            report_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap()
                + chrono::Duration::microseconds(250_123),
            peak_frequency_mhz: 2421.8751234,
            bandwidth_khz: 250.9,
            psd: vec![-120, -88, -119],
            span_mhz: (2400.0, 2479.8749),
            duration_ms: 12.80049,
            rssi_dbm: -88.6999,
            bin_width_hz: 125_000.0,
            sample_count: 204_800,
            magnitude_trace: Vec::new(),
        }
    }

    #[test]
    fn json_form_uses_fixed_field_names_and_precision() {
        let json = record().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["reportTime"], "2024-05-01 12:30:15.250123");
        assert_eq!(value["frequencyMHz"].as_f64().unwrap(), 2421.875);
        assert_eq!(value["bandwidthKHz"].as_i64().unwrap(), 250);
        assert_eq!(value["psd"].as_array().unwrap().len(), 3);
        assert_eq!(value["spanMHz"][1].as_f64().unwrap(), 2479.875);
        assert_eq!(value["durationMs"].as_f64().unwrap(), 12.8);
        assert_eq!(value["rssidBm"].as_f64().unwrap(), -88.7);
    }
}
