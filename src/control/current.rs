//! Torque <-> motor current through the transmission and the vetting clamp.

use crate::config::ControlConfig;

#[derive(Debug, Clone, Copy)]
pub struct CurrentConverter {
    efficiency: f64,
    kt: f64,
    bias_ma: i32,
    max_ma: i32,
    motor_sign: i32,
}

impl CurrentConverter {
    pub fn new(cfg: &ControlConfig, motor_sign: i8) -> Self {
        Self {
            efficiency: cfg.efficiency,
            kt: cfg.kt_nm_per_a,
            bias_ma: cfg.bias_current_ma,
            max_ma: cfg.max_allowable_current_ma,
            motor_sign: if motor_sign < 0 { -1 } else { 1 },
        }
    }

    /// `I = τ·1000·sign / (N·η·K_t)`, rounded to whole mA.
    #[inline]
    pub fn torque_to_current(&self, torque_nm: f64, n: f64) -> i32 {
        (torque_nm * 1000.0 * self.motor_sign as f64 / (n * self.efficiency * self.kt)).round() as i32
    }

    /// Clamps the magnitude into [bias, max] and applies the motor sign.
    /// The flag reports whether the clamp changed the magnitude.
    #[inline]
    pub fn vet(&self, current_ma: i32) -> (i32, bool) {
        let mag = current_ma.saturating_abs();
        let vetted = mag.clamp(self.bias_ma, self.max_ma);
        (vetted * self.motor_sign, vetted != mag)
    }

    /// Ankle torque delivered by a measured motor current.
    #[inline]
    pub fn ankle_torque(&self, motor_current_ma: f64, n: f64) -> f64 {
        motor_current_ma * self.kt * n * self.efficiency * self.motor_sign as f64 / 1000.0
    }

    #[inline]
    pub fn bias_command(&self) -> i32 {
        self.bias_ma * self.motor_sign
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_uses_sign_and_constants() {
        let conv = CurrentConverter::new(&ControlConfig::default(), -1);
        let i = conv.torque_to_current(20.0, 20.0);
        assert_eq!(i, -7610);
        let back = conv.ankle_torque(i as f64, 20.0);
        assert!((back - 20.0).abs() < 0.01);
    }

    #[test]
    fn vetting_keeps_magnitude_in_bounds() {
        let conv = CurrentConverter::new(&ControlConfig::default(), 1);
        assert_eq!(conv.vet(120), (500, true));
        assert_eq!(conv.vet(-120), (500, true));
        assert_eq!(conv.vet(7_000), (7_000, false));
        assert_eq!(conv.vet(45_000), (20_000, true));
        assert_eq!(conv.vet(i32::MIN), (20_000, true));

        let left = CurrentConverter::new(&ControlConfig::default(), -1);
        assert_eq!(left.vet(7_000), (-7_000, false));
        assert_eq!(left.bias_command(), -500);
    }
}
