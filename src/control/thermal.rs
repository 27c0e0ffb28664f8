//! thermal.rs
//! Lumped winding/case thermal model. The case is measured, so only the winding
//! temperature is integrated:
//!
//!   T_w += dt * (I²·R_phase - k_wc·(T_w - T_c)) / C_w

use crate::config::ThermalConfig;

/// Phase resistance, ohms.
pub const R_PHASE: f64 = 0.376;
/// Winding heat capacity, J/K.
pub const C_W: f64 = 0.20 * 81.46;
/// Winding-to-case thermal resistance, K/W.
pub const R_WC: f64 = 1.0702867186480716;
/// Winding-to-case conductance, W/K.
pub const K_WC: f64 = 1.0 / R_WC;

/// Integration steps longer than this are treated as a stall and truncated.
const MAX_DT_S: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThermalTrip {
    Case(f64),
    Winding(f64),
}

#[derive(Debug, Clone)]
pub struct ThermalModel {
    t_w: f64,
    t_c: f64,
    seeded: bool,
    prev_raw: Option<f64>,
    rejected: u64,
    cfg: ThermalConfig,
}

impl ThermalModel {
    pub fn new(cfg: &ThermalConfig) -> Self {
        Self {
            t_w: cfg.ambient_c,
            t_c: cfg.ambient_c,
            seeded: false,
            prev_raw: None,
            rejected: 0,
            cfg: cfg.clone(),
        }
    }

    /// Feeds a measured case temperature through the anti-spike filter.
    /// A plausible reading more than `max_temp_jump_c` away from the previous plausible
    /// reading is held back, so a real level shift lands on its second sample.
    /// Returns false when the sample was replaced by the previous one.
    pub fn set_case_temp(&mut self, raw_c: f64) -> bool {
        if !raw_c.is_finite() || raw_c.abs() > self.cfg.temp_antispike_c {
            self.rejected += 1;
            return false;
        }
        let prev = self.prev_raw.replace(raw_c);
        if !self.seeded {
            // first good sample seeds both masses
            self.t_c = raw_c;
            self.t_w = raw_c;
            self.seeded = true;
            return true;
        }
        if prev.is_some_and(|p| (raw_c - p).abs() > self.cfg.max_temp_jump_c) {
            self.rejected += 1;
            return false;
        }
        self.t_c = raw_c;
        true
    }

    pub fn update(&mut self, dt_s: f64, motor_current_ma: f64) {
        let dt = dt_s.clamp(0.0, MAX_DT_S);
        let i_a = motor_current_ma / 1000.0;
        let p_dissipated = i_a * i_a * R_PHASE;
        self.t_w += dt * (p_dissipated - K_WC * (self.t_w - self.t_c)) / C_W;
    }

    /// Steady-state winding temperature for a constant current at the current case temperature.
    pub fn steady_state(&self, motor_current_ma: f64) -> f64 {
        let i_a = motor_current_ma / 1000.0;
        self.t_c + i_a * i_a * R_PHASE / K_WC
    }

    #[inline]
    pub fn t_w(&self) -> f64 {
        self.t_w
    }

    #[inline]
    pub fn t_c(&self) -> f64 {
        self.t_c
    }

    pub fn rejected_samples(&self) -> u64 {
        self.rejected
    }

    /// Thermal safety predicate. `raw_case_c` is the unfiltered reading: a plausible
    /// (below the anti-spike bound) hot reading trips even if the filter held it back.
    pub fn check(&self, raw_case_c: f64) -> Option<ThermalTrip> {
        let raw_hot = raw_case_c.is_finite()
            && raw_case_c.abs() <= self.cfg.temp_antispike_c
            && raw_case_c >= self.cfg.max_case_temp_c;
        if raw_hot {
            Some(ThermalTrip::Case(raw_case_c))
        } else if self.t_c >= self.cfg.max_case_temp_c {
            Some(ThermalTrip::Case(self.t_c))
        } else if self.t_w >= self.cfg.max_winding_temp_c {
            Some(ThermalTrip::Winding(self.t_w))
        } else {
            None
        }
    }

    pub fn over_limit(&self, raw_case_c: f64) -> bool {
        self.check(raw_case_c).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ThermalModel {
        ThermalModel::new(&ThermalConfig::default())
    }

    #[test]
    fn winding_heats_monotonically_under_constant_current() {
        let mut m = model();
        m.set_case_temp(30.0);
        let steady = m.steady_state(8_000.0);
        assert!(m.t_w() < steady);
        let mut prev = m.t_w();
        for _ in 0..20_000 {
            m.update(0.001, 8_000.0);
            assert!(m.t_w() > prev);
            assert!(m.t_w() < steady);
            prev = m.t_w();
        }
    }

    #[test]
    fn antispike_keeps_previous_sample() {
        let mut m = model();
        assert!(m.set_case_temp(31.0));
        assert!(!m.set_case_temp(150.0));
        assert!(m.set_case_temp(33.0));
        assert!(!m.set_case_temp(40.0));
        assert_eq!(m.t_c(), 33.0);
        assert_eq!(m.rejected_samples(), 2);
    }

    #[test]
    fn level_shift_is_followed_on_second_reading() {
        let mut m = model();
        assert!(m.set_case_temp(30.0));
        assert!(!m.set_case_temp(36.0));
        assert_eq!(m.t_c(), 30.0);
        for _ in 0..100 {
            assert!(m.set_case_temp(36.0));
        }
        assert_eq!(m.t_c(), 36.0);
        assert_eq!(m.rejected_samples(), 1);
    }

    #[test]
    fn single_spike_costs_one_extra_sample() {
        let mut m = model();
        m.set_case_temp(30.0);
        assert!(!m.set_case_temp(42.0));
        assert!(!m.set_case_temp(30.0));
        assert!(m.set_case_temp(30.2));
        assert_eq!(m.t_c(), 30.2);
    }

    #[test]
    fn implausible_first_sample_does_not_seed() {
        let mut m = model();
        assert!(!m.set_case_temp(-120.0));
        assert_eq!(m.t_c(), 25.0);
        assert!(m.set_case_temp(45.0));
        assert_eq!(m.t_w(), 45.0);
    }

    #[test]
    fn hot_case_trips_even_when_filtered() {
        let mut m = model();
        m.set_case_temp(30.0);
        assert!(!m.over_limit(30.0));
        assert!(!m.set_case_temp(80.0));
        assert!(m.over_limit(80.0));
        // sensor garbage above the anti-spike bound does not trip
        assert!(!m.over_limit(250.0));
    }

    #[test]
    fn hot_winding_trips() {
        let mut m = model();
        m.set_case_temp(60.0);
        for _ in 0..200_000 {
            m.update(0.01, 15_000.0);
        }
        assert!(m.t_w() >= 110.0);
        assert!(matches!(m.check(60.0), Some(ThermalTrip::Winding(_))));
    }
}
