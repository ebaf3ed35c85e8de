use std::path::{Path, PathBuf};

use image::{ImageFormat, ImageResult, Rgb, RgbImage};
use sweepcore::interface::DetectionRecord;

pub const PLOT_WIDTH: u32 = 1000;
pub const PLOT_HEIGHT: u32 = 500;
const MARGIN: u32 = 24;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const FRAME: Rgb<u8> = Rgb([190, 190, 190]);
const TRACE: Rgb<u8> = Rgb([31, 119, 180]);
const PEAK: Rgb<u8> = Rgb([214, 39, 40]);

/// Renders one PNG per detection: time-domain magnitude on the left, the
/// stitched PSD on the right with the peak bin marked.
#[derive(Debug, Clone)]
pub struct PlotWriter {
    directory: PathBuf,
}

/// Pixel rectangle of one panel, inside the frame.
#[derive(Debug, Clone, Copy)]
struct Panel {
    left: u32,
    top: u32,
    width: u32,
    height: u32,
}

impl Panel {
    fn column(&self, index: usize, len: usize) -> u32 {
        if len <= 1 {
            return self.left;
        }
        self.left + (index as f64 / (len - 1) as f64 * (self.width - 1) as f64).round() as u32
    }

    fn row(&self, value: f64, min: f64, max: f64) -> u32 {
        let range = max - min;
        let fraction = if range > 0.0 { (value - min) / range } else { 0.5 };
        let offset = ((1.0 - fraction.clamp(0.0, 1.0)) * (self.height - 1) as f64).round() as u32;
        self.top + offset
    }
}

impl PlotWriter {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// `<report time>.png` inside the plot directory.
    pub fn path_for(&self, record: &DetectionRecord) -> PathBuf {
        let stamp = record.report_time.format("%Y-%m-%dT%H-%M-%S%.6f");
        self.directory.join(format!("{stamp}.png"))
    }

    pub fn render(record: &DetectionRecord) -> RgbImage {
        let mut image = RgbImage::from_pixel(PLOT_WIDTH, PLOT_HEIGHT, BACKGROUND);
        let half = PLOT_WIDTH / 2;
        let time_panel = Panel {
            left: MARGIN,
            top: MARGIN,
            width: half - 2 * MARGIN,
            height: PLOT_HEIGHT - 2 * MARGIN,
        };
        let psd_panel = Panel {
            left: half + MARGIN,
            ..time_panel
        };

        let magnitudes: Vec<f64> = record.magnitude_trace.iter().map(|&m| f64::from(m)).collect();
        draw_series(&mut image, time_panel, &magnitudes);

        let psd: Vec<f64> = record.psd.iter().map(|&p| f64::from(p)).collect();
        if let Some(peak) = psd_peak(record) {
            let x = psd_panel.column(peak, psd.len());
            draw_line(
                &mut image,
                (x, psd_panel.top),
                (x, psd_panel.top + psd_panel.height - 1),
                PEAK,
            );
        }
        draw_series(&mut image, psd_panel, &psd);
        image
    }

    /// Renders `record` and writes it as PNG, returning the file written.
    pub fn write(&self, record: &DetectionRecord) -> ImageResult<PathBuf> {
        let path = self.path_for(record);
        Self::render(record).save_with_format(&path, ImageFormat::Png)?;
        Ok(path)
    }
}

/// Stitched bin nearest the reported peak frequency.
fn psd_peak(record: &DetectionRecord) -> Option<usize> {
    if record.psd.is_empty() || record.bin_width_hz <= 0.0 {
        return None;
    }
    let offset = (record.peak_frequency_mhz - record.span_mhz.0) * 1e6 / record.bin_width_hz;
    Some((offset.round().max(0.0) as usize).min(record.psd.len() - 1))
}

fn draw_series(image: &mut RgbImage, panel: Panel, values: &[f64]) {
    let right = panel.left + panel.width - 1;
    let bottom = panel.top + panel.height - 1;
    draw_line(image, (panel.left, panel.top), (right, panel.top), FRAME);
    draw_line(image, (panel.left, bottom), (right, bottom), FRAME);
    draw_line(image, (panel.left, panel.top), (panel.left, bottom), FRAME);
    draw_line(image, (right, panel.top), (right, bottom), FRAME);

    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() {
        return;
    }
    let points: Vec<(u32, u32)> = values
        .iter()
        .enumerate()
        .map(|(i, &v)| (panel.column(i, values.len()), panel.row(v, min, max)))
        .collect();
    if let [only] = points.as_slice() {
        image.put_pixel(only.0, only.1, TRACE);
    }
    for pair in points.windows(2) {
        draw_line(image, pair[0], pair[1], TRACE);
    }
}

/// Bresenham line between two in-bounds pixels.
fn draw_line(image: &mut RgbImage, from: (u32, u32), to: (u32, u32), color: Rgb<u8>) {
    let (mut x, mut y) = (i64::from(from.0), i64::from(from.1));
    let (x1, y1) = (i64::from(to.0), i64::from(to.1));
    let dx = (x1 - x).abs();
    let dy = -(y1 - y).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
            image.put_pixel(x as u32, y as u32, color);
        }
        if x == x1 && y == y1 {
            break;
        }
        let doubled = 2 * err;
        if doubled >= dy {
            err += dy;
            x += sx;
        }
        if doubled <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record() -> DetectionRecord {
        DetectionRecord {
            report_time: Utc.with_ymd_and_hms(2024, 6, 2, 8, 15, 30).unwrap(),
            peak_frequency_mhz: 433.5,
            bandwidth_khz: 200.0,
            psd: vec![-110, -108, -70, -109, -111],
            span_mhz: (433.3, 433.7),
            duration_ms: 1.0,
            rssi_dbm: -70.0,
            bin_width_hz: 100_000.0,
            sample_count: 2048,
            magnitude_trace: vec![0.0, 0.5, 1.0, 0.5],
        }
    }

    #[test]
    fn peak_is_marked_in_the_psd_panel() {
        let image = PlotWriter::render(&record());
        assert_eq!(image.dimensions(), (PLOT_WIDTH, PLOT_HEIGHT));

        // bin 2 of 5 sits in the middle column of the right panel
        let panel_width = PLOT_WIDTH / 2 - 2 * MARGIN;
        let x = PLOT_WIDTH / 2 + MARGIN + ((panel_width - 1) as f64 / 2.0).round() as u32;
        // the maximum of the series is drawn on the top row
        assert_eq!(*image.get_pixel(x, MARGIN), TRACE);
        assert_eq!(*image.get_pixel(x, PLOT_HEIGHT / 2), PEAK);
        assert_eq!(*image.get_pixel(PLOT_WIDTH / 2, PLOT_HEIGHT / 2), BACKGROUND);
    }

    #[test]
    fn empty_trace_leaves_only_the_frame() {
        let mut record = record();
        record.magnitude_trace.clear();
        let image = PlotWriter::render(&record);
        assert_eq!(*image.get_pixel(MARGIN, MARGIN), FRAME);
        assert_eq!(*image.get_pixel(PLOT_WIDTH / 4, PLOT_HEIGHT / 2), BACKGROUND);
    }

    #[test]
    fn plot_is_written_as_png_named_after_report_time() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PlotWriter::new(dir.path());
        let path = writer.write(&record()).unwrap();
        assert_eq!(path, dir.path().join("2024-06-02T08-15-30.000000.png"));
        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.width(), PLOT_WIDTH);
        assert_eq!(decoded.height(), PLOT_HEIGHT);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PlotWriter::new(dir.path().join("absent"));
        assert!(writer.write(&record()).is_err());
    }
}
