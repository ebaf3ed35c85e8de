use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::prelude::{SweepError, SweepResult};

/// Taper applied to each FFT segment.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunction {
    Boxcar,
    #[default]
    Hann,
    Hamming,
    Blackman,
    Bartlett,
    /// Shape parameter beta.
    Kaiser(f64),
    /// Fraction of the window inside the cosine tapers.
    Tukey(f64),
}

impl fmt::Display for WindowFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowFunction::Boxcar => write!(f, "boxcar"),
            WindowFunction::Hann => write!(f, "hann"),
            WindowFunction::Hamming => write!(f, "hamming"),
            WindowFunction::Blackman => write!(f, "blackman"),
            WindowFunction::Bartlett => write!(f, "bartlett"),
            WindowFunction::Kaiser(beta) => write!(f, "kaiser({beta})"),
            WindowFunction::Tukey(alpha) => write!(f, "tukey({alpha})"),
        }
    }
}

impl WindowFunction {
    /// Resolves a window by name; kaiser and tukey require `param`.
    pub fn parse(name: &str, param: Option<f64>) -> SweepResult<Self> {
        let window = match name.to_ascii_lowercase().as_str() {
            "boxcar" | "rectangular" => WindowFunction::Boxcar,
            "hann" | "hanning" => WindowFunction::Hann,
            "hamming" => WindowFunction::Hamming,
            "blackman" => WindowFunction::Blackman,
            "bartlett" => WindowFunction::Bartlett,
            "kaiser" => WindowFunction::Kaiser(param.ok_or_else(|| {
                SweepError::config("kaiser window requires a shape parameter (beta)")
            })?),
            "tukey" => WindowFunction::Tukey(param.ok_or_else(|| {
                SweepError::config("tukey window requires a shape parameter (alpha)")
            })?),
            other => {
                return Err(SweepError::config(format!("unknown window function {other}")))
            }
        };
        Ok(window)
    }

    /// Periodic (DFT-even) coefficients of length `len`.
    pub fn coefficients(&self, len: usize) -> Vec<f32> {
        if len == 0 {
            return Vec::new();
        }
        let mut window = self.symmetric(len + 1);
        window.truncate(len);
        window.into_iter().map(|w| w as f32).collect()
    }

    fn symmetric(&self, len: usize) -> Vec<f64> {
        if len == 1 {
            return vec![1.0];
        }
        let m = (len - 1) as f64;
        (0..len)
            .map(|n| {
                let n = n as f64;
                match *self {
                    WindowFunction::Boxcar => 1.0,
                    WindowFunction::Hann => 0.5 - 0.5 * (2.0 * PI * n / m).cos(),
                    WindowFunction::Hamming => 0.54 - 0.46 * (2.0 * PI * n / m).cos(),
                    WindowFunction::Blackman => {
                        0.42 - 0.5 * (2.0 * PI * n / m).cos() + 0.08 * (4.0 * PI * n / m).cos()
                    }
                    WindowFunction::Bartlett => 1.0 - (2.0 * n / m - 1.0).abs(),
                    WindowFunction::Kaiser(beta) => {
                        let ratio = 2.0 * n / m - 1.0;
                        bessel_i0(beta * (1.0 - ratio * ratio).max(0.0).sqrt()) / bessel_i0(beta)
                    }
                    WindowFunction::Tukey(alpha) => tukey(alpha, n, m),
                }
            })
            .collect()
    }
}

fn tukey(alpha: f64, n: f64, m: f64) -> f64 {
    if alpha <= 0.0 {
        return 1.0;
    }
    if alpha >= 1.0 {
        return 0.5 - 0.5 * (2.0 * PI * n / m).cos();
    }
    let edge = alpha * m / 2.0;
    if n < edge {
        0.5 * (1.0 + (PI * (n / edge - 1.0)).cos())
    } else if n > m - edge {
        0.5 * (1.0 + (PI * ((n - m) / edge + 1.0)).cos())
    } else {
        1.0
    }
}

/// Modified Bessel function of the first kind, order zero.
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    let mut k = 1.0;
    while term > sum * 1e-14 {
        term *= (half / k) * (half / k);
        sum += term;
        k += 1.0;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-6, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn periodic_hann_matches_reference() {
        let window = WindowFunction::Hann.coefficients(4);
        assert_close(&window, &[0.0, 0.5, 1.0, 0.5]);
    }

    #[test]
    fn tukey_limits_reduce_to_boxcar_and_hann() {
        assert_close(
            &WindowFunction::Tukey(0.0).coefficients(8),
            &WindowFunction::Boxcar.coefficients(8),
        );
        assert_close(
            &WindowFunction::Tukey(1.0).coefficients(8),
            &WindowFunction::Hann.coefficients(8),
        );
    }

    #[test]
    fn kaiser_with_zero_beta_is_flat() {
        assert_close(&WindowFunction::Kaiser(0.0).coefficients(5), &[1.0; 5]);
        let tapered = WindowFunction::Kaiser(8.6).coefficients(16);
        assert!(tapered[0] < 0.01);
        assert!((tapered[8] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn parse_requires_shape_parameter() {
        assert!(WindowFunction::parse("kaiser", None).is_err());
        assert_eq!(
            WindowFunction::parse("tukey", Some(0.25)).unwrap(),
            WindowFunction::Tukey(0.25)
        );
        assert_eq!(WindowFunction::parse("HANN", None).unwrap(), WindowFunction::Hann);
        assert!(WindowFunction::parse("flattop", None).is_err());
    }
}
