//! profile.rs
//! Four-point assistance profile: normalized torque shape over one stride.
//!
//! Rising and falling segments are cubic splines through two points with zero end
//! slopes; outside [onset, dropoff] the shape is zero. The shape is tabulated once
//! on `grid` points over u ∈ [0, 1) and looked up by nearest index.

use crate::config::ProfileConfig;
use crate::error::ProfileError;

/// Result of a profile lookup. `clamped` flags a negative torque replaced by the holding torque.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TorqueSetpoint {
    pub torque_nm: f64,
    pub clamped: bool,
}

#[derive(Debug, Clone)]
pub struct AssistanceProfile {
    table: Vec<f64>,
    onset: f64,
    peak: f64,
    dropoff: f64,
    toe_off: f64,
    holding_torque: f64,
}

/// Cubic through (x0, y0) and (x1, y1) with zero derivative at both ends.
#[inline]
fn clamped_cubic(x: f64, x0: f64, y0: f64, x1: f64, y1: f64) -> f64 {
    let s = ((x - x0) / (x1 - x0)).clamp(0.0, 1.0);
    y0 + (y1 - y0) * s * s * (3.0 - 2.0 * s)
}

impl AssistanceProfile {
    pub fn new(cfg: &ProfileConfig) -> Result<Self, ProfileError> {
        if !(cfg.rise > 0.0) || !(cfg.fall > 0.0) {
            return Err(ProfileError::InvalidTiming("rise and fall must be positive"));
        }
        if cfg.peak - cfg.rise <= 0.0 {
            return Err(ProfileError::InvalidTiming("peak must come after rise"));
        }
        if !(cfg.peak + cfg.fall <= cfg.toe_off && cfg.toe_off < 100.0) {
            return Err(ProfileError::InvalidTiming("need peak + fall <= toe_off < 100"));
        }
        if cfg.grid < 2 {
            return Err(ProfileError::InvalidTiming("grid needs at least two samples"));
        }

        let onset = (cfg.peak - cfg.rise) / 100.0;
        let peak = cfg.peak / 100.0;
        let dropoff = (cfg.peak + cfg.fall) / 100.0;

        let table = (0..cfg.grid)
            .map(|i| {
                let u = i as f64 / cfg.grid as f64;
                if u < onset || u > dropoff {
                    0.0
                } else if u <= peak {
                    clamped_cubic(u, onset, 0.0, peak, 1.0)
                } else {
                    clamped_cubic(u, peak, 1.0, dropoff, 0.0)
                }
            })
            .collect();

        Ok(Self {
            table,
            onset,
            peak,
            dropoff,
            toe_off: cfg.toe_off / 100.0,
            holding_torque: cfg.holding_torque_nm,
        })
    }

    /// Normalized shape s(u) ∈ [0, 1]. `u >= 1` reads the last bucket.
    #[inline]
    pub fn shape(&self, u: f64) -> f64 {
        let g = self.table.len();
        let idx = (u.max(0.0) * g as f64).round() as usize;
        self.table[idx.min(g - 1)]
    }

    /// Torque setpoint `t` seconds after heel-strike.
    pub fn torque(
        &self,
        t: f64,
        stride_period: f64,
        peak_torque: f64,
        in_swing: bool,
    ) -> Result<TorqueSetpoint, ProfileError> {
        if in_swing {
            return Ok(TorqueSetpoint { torque_nm: self.holding_torque, clamped: false });
        }
        if !(stride_period > 0.0) {
            return Err(ProfileError::ZeroStridePeriod);
        }

        let s = self.shape(t / stride_period);
        let torque = self.holding_torque + s * (peak_torque - self.holding_torque);
        if torque < 0.0 {
            return Ok(TorqueSetpoint { torque_nm: self.holding_torque, clamped: true });
        }
        Ok(TorqueSetpoint { torque_nm: torque, clamped: false })
    }

    pub fn holding_torque(&self) -> f64 {
        self.holding_torque
    }

    /// Stride fractions (onset, peak, dropoff, toe-off).
    pub fn timings(&self) -> (f64, f64, f64, f64) {
        (self.onset, self.peak, self.dropoff, self.toe_off)
    }
}
