//! transmission.rs
//! Ankle angle -> instantaneous gear ratio N(θ), tabulated once per side.

use std::path::Path;

use crate::config::TransmissionConfig;
use crate::error::CalibrationError;
use crate::model::calibration::{CalibrationRecord, polyval};

#[derive(Debug, Clone)]
pub struct TransmissionRatio {
    table: Vec<f64>,
    theta_min: f64,
    theta_max: f64,
    n_min: f64,
    dorsi_offset: f64,
}

impl TransmissionRatio {
    pub fn new(cal: &CalibrationRecord, cfg: &TransmissionConfig) -> Self {
        let bins = cfg.bins.max(2);
        let step = (cfg.theta_max_deg - cfg.theta_min_deg) / (bins - 1) as f64;
        let table = (0..bins)
            .map(|i| polyval(&cal.tr_coefs, cfg.theta_min_deg + i as f64 * step))
            .collect();
        Self {
            table,
            theta_min: cfg.theta_min_deg,
            theta_max: cfg.theta_max_deg,
            n_min: cfg.n_min,
            dorsi_offset: cal.dorsi_offset,
        }
    }

    /// Loads the calibration file; any parse failure is a `CalibrationError`.
    pub fn from_file(path: &Path, cfg: &TransmissionConfig) -> Result<Self, CalibrationError> {
        Ok(Self::new(&CalibrationRecord::load(path)?, cfg))
    }

    /// Raw encoder reading at maximum dorsiflexion, degrees.
    #[inline]
    pub fn get_offset(&self) -> f64 {
        self.dorsi_offset
    }

    /// Gear ratio at `theta_deg`, never below `n_min`.
    #[inline]
    pub fn get_n(&self, theta_deg: f64) -> f64 {
        let theta = if theta_deg.is_nan() { self.theta_min } else { theta_deg.clamp(self.theta_min, self.theta_max) };
        let last = self.table.len() - 1;
        let idx = ((theta - self.theta_min) / (self.theta_max - self.theta_min) * last as f64).round() as usize;
        self.table[idx.min(last)].max(self.n_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TransmissionConfig {
        TransmissionConfig::default()
    }

    #[test]
    fn floor_holds_everywhere() {
        // N dips to negative values mid-range
        let cal = CalibrationRecord::from_motor_curve(vec![0.002, -0.4, 15.0, 0.0], 80.0).unwrap();
        let tr = TransmissionRatio::new(&cal, &cfg());
        let mut theta = -50.0;
        while theta < 250.0 {
            assert!(tr.get_n(theta) >= 10.0, "N({theta}) below floor");
            theta += 0.37;
        }
        assert!(tr.get_n(f64::NAN) >= 10.0);
    }

    #[test]
    fn matches_polynomial_away_from_floor() {
        let cal = CalibrationRecord::from_motor_curve(vec![0.0, 0.05, 12.0, 0.0], 80.0).unwrap();
        let tr = TransmissionRatio::new(&cal, &cfg());
        for theta in [0.0, 45.0, 90.0, 180.0] {
            let expect = cal.transmission_ratio(theta);
            assert!((tr.get_n(theta) - expect).abs() < 0.02, "theta={theta}");
        }
        // clamped outside the table
        assert_eq!(tr.get_n(400.0), tr.get_n(180.0));
        assert_eq!(tr.get_n(-10.0), tr.get_n(0.0));
        assert_eq!(tr.get_offset(), 80.0);
    }
}
