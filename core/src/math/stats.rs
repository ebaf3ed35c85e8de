use num_complex::Complex32;

/// Smallest linear power converted to dB, keeps empty bins finite.
pub const POWER_FLOOR: f64 = 1e-20;

pub struct StatsHelper;

impl StatsHelper {
    pub fn mean(samples: &[Complex32]) -> Complex32 {
        if samples.is_empty() {
            return Complex32::new(0.0, 0.0);
        }
        let sum: Complex32 = samples.iter().sum();
        sum / samples.len() as f32
    }

    pub fn power_to_db(power: f64) -> f64 {
        10.0 * power.max(POWER_FLOOR).log10()
    }

    pub fn db_to_power(db: f64) -> f64 {
        10f64.powf(db / 10.0)
    }
}
