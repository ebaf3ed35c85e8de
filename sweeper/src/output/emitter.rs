use crate::output::bridge::StatusBridge;
use crate::output::format::OutputFormat;
use crate::output::plot::PlotWriter;
use anyhow::Context;
use log::{debug, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::UdpSocket;
use std::path::Path;
use sweepcore::interface::{DetectionRecord, RecordSink};
use sweepcore::prelude::{SweepError, SweepResult};

/// Writes detection records in the configured format and forwards the JSON
/// form to a UDP collector.
pub struct Emitter {
    format: OutputFormat,
    writer: Box<dyn Write + Send>,
    collector: Option<(UdpSocket, String)>,
    bridge: Option<StatusBridge>,
    plots: Option<PlotWriter>,
}

impl Emitter {
    /// `output` of `None` or `-` writes to stdout.
    pub fn new(format: OutputFormat, output: Option<&Path>) -> anyhow::Result<Self> {
        let writer: Box<dyn Write + Send> = match output {
            Some(path) if path != Path::new("-") => Box::new(BufWriter::new(
                File::create(path)
                    .with_context(|| format!("creating output file {}", path.display()))?,
            )),
            _ => {
                if format.is_binary() {
                    warn!("writing binary {:?} records to stdout", format);
                }
                Box::new(io::stdout())
            }
        };
        Ok(Self::with_writer(format, writer))
    }

    pub fn with_writer(format: OutputFormat, writer: Box<dyn Write + Send>) -> Self {
        Self {
            format,
            writer,
            collector: None,
            bridge: None,
            plots: None,
        }
    }

    /// Also sends each record's JSON form as one datagram to `server:port`.
    pub fn with_collector(mut self, server: &str, port: u16) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).context("binding UDP socket")?;
        self.collector = Some((socket, format!("{server}:{port}")));
        Ok(self)
    }

    pub fn with_bridge(mut self, bridge: StatusBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Also renders a PNG plot of each detection.
    pub fn with_plots(mut self, plots: PlotWriter) -> Self {
        self.plots = Some(plots);
        self
    }

    fn plot(&self, record: &DetectionRecord) -> SweepResult<()> {
        let Some(plots) = &self.plots else {
            return Ok(());
        };
        let path = plots
            .write(record)
            .map_err(|err| SweepError::Output(format!("plotting detection: {err}")))?;
        debug!("plot written to {}", path.display());
        Ok(())
    }

    fn send_to_collector(&self, record: &DetectionRecord) -> SweepResult<()> {
        let Some((socket, target)) = &self.collector else {
            return Ok(());
        };
        let json = record
            .to_json()
            .map_err(|err| SweepError::Output(format!("encoding record: {err}")))?;
        let payload = format!("{json}\n");
        socket
            .send_to(payload.as_bytes(), target.as_str())
            .map_err(|err| SweepError::Output(format!("sending record to {target}: {err}")))?;
        debug!("sent {} byte record to {}", payload.len(), target);
        Ok(())
    }
}

impl RecordSink for Emitter {
    fn emit(&mut self, record: &DetectionRecord) -> SweepResult<()> {
        if let Some(bridge) = &self.bridge {
            bridge.publish(record);
        }
        let written = self
            .format
            .write_record(record, self.writer.as_mut())
            .and_then(|_| self.writer.flush())
            .map_err(|err| SweepError::Output(format!("writing {:?} record: {err}", self.format)));
        let sent = self.send_to_collector(record);
        let plotted = self.plot(record);
        written.and(sent).and(plotted)
    }

    fn end_of_sweep(&mut self) -> SweepResult<()> {
        if let Some(bridge) = &self.bridge {
            bridge.publish_sweep();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use sweepcore::telemetry::MetricsRecorder;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn record() -> DetectionRecord {
        DetectionRecord {
            report_time: Utc::now(),
            peak_frequency_mhz: 868.3,
            bandwidth_khz: 100.0,
            psd: vec![-115, -80, -114],
            span_mhz: (868.0, 869.0),
            duration_ms: 5.0,
            rssi_dbm: -80.4,
            bin_width_hz: 50_000.0,
            sample_count: 10_000,
            magnitude_trace: Vec::new(),
        }
    }

    #[test]
    fn emitter_writes_and_sends_json() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let buffer = SharedBuffer::default();
        let bridge = StatusBridge::new(Arc::new(MetricsRecorder::new()));
        let mut emitter = Emitter::with_writer(OutputFormat::Json, Box::new(buffer.clone()))
            .with_collector("127.0.0.1", port)
            .unwrap()
            .with_bridge(bridge.clone());

        emitter.emit(&record()).unwrap();
        emitter.end_of_sweep().unwrap();

        let written = buffer.0.lock().unwrap().clone();
        let value: serde_json::Value = serde_json::from_slice(&written).unwrap();
        assert_eq!(value["rssidBm"].as_f64().unwrap(), -80.4);

        let mut datagram = [0u8; 4096];
        let (len, _) = receiver.recv_from(&mut datagram).unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&datagram[..len]).unwrap();
        assert_eq!(sent["frequencyMHz"].as_f64().unwrap(), 868.3);

        assert_eq!(bridge.snapshot().completed_sweeps, 1);
        assert_eq!(bridge.snapshot().detections, 1);
    }

    #[test]
    fn output_file_receives_rtl_power_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.csv");
        let mut emitter = Emitter::new(OutputFormat::RtlPower, Some(&path)).unwrap();
        emitter.emit(&record()).unwrap();
        emitter.emit(&record()).unwrap();
        drop(emitter);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.lines().all(|line| line.ends_with("-115, -80, -114")));
    }

    #[test]
    fn plots_are_written_per_detection() {
        let dir = tempfile::tempdir().unwrap();
        let plots = PlotWriter::new(dir.path());
        let mut with_trace = record();
        with_trace.magnitude_trace = vec![0.2, 0.4, 0.3];
        let expected = plots.path_for(&with_trace);
        let mut emitter =
            Emitter::with_writer(OutputFormat::Json, Box::new(SharedBuffer::default()))
                .with_plots(plots);
        emitter.emit(&with_trace).unwrap();
        assert!(expected.exists());
    }

    #[test]
    fn plot_failure_is_an_output_error_after_writing() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = SharedBuffer::default();
        let mut emitter = Emitter::with_writer(OutputFormat::Json, Box::new(buffer.clone()))
            .with_plots(PlotWriter::new(dir.path().join("missing")));
        let result = emitter.emit(&record());
        assert!(matches!(result, Err(SweepError::Output(_))));
        assert!(!buffer.0.lock().unwrap().is_empty());
    }
}
