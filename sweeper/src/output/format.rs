use std::io::{self, Write};

use chrono::Duration;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sweepcore::interface::DetectionRecord;

/// Magic bytes opening every binary power-table frame.
pub const SDRFF_MAGIC: &[u8; 5] = b"SDRFF";
pub const SDRFF_VERSION: u8 = 2;
/// Magic, version, five f64 fields, two u64 fields and two bytes of padding.
pub const SDRFF_HEADER_LEN: usize = 5 + 1 + 5 * 8 + 2 * 8 + 2;

/// Record encoding, fixed when the session is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum OutputFormat {
    /// CSV power table, one row per detection.
    #[default]
    RtlPower,
    /// Commented header followed by one `frequency power` line per bin.
    RtlPowerFftw,
    /// Binary SDRFF v2 power table.
    SoapyPowerBin,
    /// Fixed JSON detection record.
    Json,
}

impl OutputFormat {
    pub fn write_record(&self, record: &DetectionRecord, out: &mut dyn Write) -> io::Result<()> {
        match self {
            OutputFormat::RtlPower => write_rtl_power(record, out),
            OutputFormat::RtlPowerFftw => write_rtl_power_fftw(record, out),
            OutputFormat::SoapyPowerBin => write_soapy_power_bin(record, out),
            OutputFormat::Json => write_json(record, out),
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, OutputFormat::SoapyPowerBin)
    }
}

fn capture_stop(record: &DetectionRecord) -> chrono::DateTime<chrono::Utc> {
    record.report_time + Duration::microseconds((record.duration_ms * 1e3).round() as i64)
}

/// `date, time, Hz low, Hz high, Hz step, samples, dB, dB, ...`
fn write_rtl_power(record: &DetectionRecord, out: &mut dyn Write) -> io::Result<()> {
    let stop = capture_stop(record);
    let low = record.span_mhz.0 * 1e6;
    let high = record.span_mhz.1 * 1e6 + record.bin_width_hz;
    let mut row = vec![
        stop.format("%Y-%m-%d").to_string(),
        stop.format("%H:%M:%S").to_string(),
        format!("{}", low.round() as i64),
        format!("{}", high.round() as i64),
        format!("{:.2}", record.bin_width_hz),
        record.sample_count.to_string(),
    ];
    row.extend(record.psd.iter().map(|value| value.to_string()));
    writeln!(out, "{}", row.join(", "))
}

fn write_rtl_power_fftw(record: &DetectionRecord, out: &mut dyn Write) -> io::Result<()> {
    const STAMP: &str = "%Y-%m-%d %H:%M:%S%.6f";
    writeln!(out, "# soapy_power output")?;
    writeln!(out, "# Acquisition start: {}", record.report_time.format(STAMP))?;
    writeln!(out, "# Acquisition end: {}", capture_stop(record).format(STAMP))?;
    writeln!(out, "#")?;
    writeln!(out, "# frequency [Hz] power spectral density [dB/Hz]")?;
    let low = record.span_mhz.0 * 1e6;
    for (index, value) in record.psd.iter().enumerate() {
        writeln!(out, "{} {}", low + index as f64 * record.bin_width_hz, value)?;
    }
    writeln!(out)
}

fn write_soapy_power_bin(record: &DetectionRecord, out: &mut dyn Write) -> io::Result<()> {
    let start = record.report_time;
    let stop = capture_stop(record);
    let step = record.bin_width_hz;
    let low = record.span_mhz.0 * 1e6;
    let high = record.span_mhz.1 * 1e6 + step;
    let size = (record.psd.len() * std::mem::size_of::<f32>()) as u64;

    let mut frame = Vec::with_capacity(SDRFF_HEADER_LEN + size as usize);
    frame.extend_from_slice(SDRFF_MAGIC);
    frame.push(SDRFF_VERSION);
    for value in [
        timestamp_seconds(start),
        timestamp_seconds(stop),
        low,
        high,
        step,
    ] {
        frame.extend_from_slice(&value.to_le_bytes());
    }
    frame.extend_from_slice(&record.sample_count.to_le_bytes());
    frame.extend_from_slice(&size.to_le_bytes());
    frame.extend_from_slice(&[0u8; 2]);
    for value in &record.psd {
        frame.extend_from_slice(&(*value as f32).to_le_bytes());
    }
    out.write_all(&frame)
}

fn write_json(record: &DetectionRecord, out: &mut dyn Write) -> io::Result<()> {
    let json = record
        .to_json()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    writeln!(out, "{json}")
}

fn timestamp_seconds(time: chrono::DateTime<chrono::Utc>) -> f64 {
    time.timestamp() as f64 + f64::from(time.timestamp_subsec_micros()) / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record() -> DetectionRecord {
        DetectionRecord {
            report_time: Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap(),
            peak_frequency_mhz: 100.25,
            bandwidth_khz: 62.5,
            psd: vec![-120, -60, -121, -119],
            span_mhz: (100.0, 100.09375),
            duration_ms: 2000.0,
            rssi_dbm: -60.2,
            bin_width_hz: 31_250.0,
            sample_count: 4096,
            magnitude_trace: Vec::new(),
        }
    }

    #[test]
    fn rtl_power_row_has_header_fields_then_powers() {
        let mut out = Vec::new();
        OutputFormat::RtlPower.write_record(&record(), &mut out).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert_eq!(
            line,
            "2024-03-10, 00:00:01, 100000000, 100125000, 31250.00, 4096, -120, -60, -121, -119\n"
        );
    }

    #[test]
    fn rtl_power_fftw_lists_one_line_per_bin() {
        let mut out = Vec::new();
        OutputFormat::RtlPowerFftw
            .write_record(&record(), &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# soapy_power output");
        assert_eq!(lines[1], "# Acquisition start: 2024-03-09 23:59:59.000000");
        assert_eq!(lines[2], "# Acquisition end: 2024-03-10 00:00:01.000000");
        assert_eq!(&lines[5..9], ["100000000 -120", "100031250 -60", "100062500 -121", "100093750 -119"]);
        assert_eq!(lines[9], "");
        assert!(!OutputFormat::RtlPowerFftw.is_binary());
    }

    #[test]
    fn soapy_power_bin_frame_layout() {
        let mut out = Vec::new();
        OutputFormat::SoapyPowerBin
            .write_record(&record(), &mut out)
            .unwrap();
        assert_eq!(out.len(), SDRFF_HEADER_LEN + 16);
        assert_eq!(&out[..5], SDRFF_MAGIC);
        assert_eq!(out[5], SDRFF_VERSION);

        let field = |offset: usize| f64::from_le_bytes(out[offset..offset + 8].try_into().unwrap());
        assert_eq!(field(6 + 16), 100.0e6);
        assert_eq!(field(6 + 24), 100.125e6);
        assert_eq!(field(6 + 32), 31_250.0);
        assert_eq!(field(6 + 8) - field(6), 2.0);
        let size = u64::from_le_bytes(out[54..62].try_into().unwrap());
        assert_eq!(size, 16);
        let first = f32::from_le_bytes(out[64..68].try_into().unwrap());
        assert_eq!(first, -120.0);
    }

    #[test]
    fn json_format_is_one_pretty_record() {
        let mut out = Vec::new();
        OutputFormat::Json.write_record(&record(), &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["frequencyMHz"].as_f64().unwrap(), 100.25);
        assert_eq!(value["bandwidthKHz"].as_i64().unwrap(), 62);
        assert!(!OutputFormat::Json.is_binary());
    }
}
