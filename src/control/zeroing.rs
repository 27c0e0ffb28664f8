//! zeroing.rs
//! One-shot zeroing before the control loop starts.
//!
//! A small pull current takes up belt slack while the wearer stands still. If motor
//! and ankle speeds stay under their thresholds for enough of the window, the mean
//! angles over the window become the zeros. Otherwise the window is repeated, up to
//! `max_attempts` times.

use log::{info, warn};

use crate::config::ZeroingConfig;
use crate::device::ExoDevice;
use crate::error::ExoError;
use crate::model::side::SideConfig;
use crate::utils::scheduler::DeadlineScheduler;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Zeros {
    pub motor_deg: f64,
    pub ankle_deg: f64,
}

/// Statistics of one zeroing window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ZeroingWindow {
    pub samples: u32,
    pub still: u32,
    pub motor_sum: f64,
    pub ankle_sum: f64,
}

impl ZeroingWindow {
    pub fn add(&mut self, motor_deg: f64, ankle_deg: f64, motor_vel: f64, ankle_vel: f64, cfg: &ZeroingConfig) {
        self.samples += 1;
        self.motor_sum += motor_deg;
        self.ankle_sum += ankle_deg;
        if motor_vel.abs() < cfg.motor_velocity_threshold_dps && ankle_vel.abs() < cfg.ankle_velocity_threshold_dps {
            self.still += 1;
        }
    }

    pub fn still_fraction(&self) -> f64 {
        if self.samples == 0 { 0.0 } else { self.still as f64 / self.samples as f64 }
    }

    /// Zeros if the window was quiet enough.
    pub fn accept(&self, cfg: &ZeroingConfig) -> Option<Zeros> {
        (self.samples > 0 && self.still_fraction() >= cfg.still_fraction).then(|| Zeros {
            motor_deg: self.motor_sum / self.samples as f64,
            ankle_deg: self.ankle_sum / self.samples as f64,
        })
    }
}

/// Runs the procedure on an opened, streaming device.
pub fn zero_actuator(
    device: &mut dyn ExoDevice,
    side: SideConfig,
    cfg: &ZeroingConfig,
    loop_hz: f64,
) -> Result<Zeros, ExoError> {
    let pull = cfg.pull_current_ma.abs() * i32::from(side.motor_sign);
    let ticks = (cfg.window_s * loop_hz).ceil().max(1.0) as u64;

    for attempt in 1..=cfg.max_attempts {
        let mut window = ZeroingWindow::default();
        let mut sched = DeadlineScheduler::new(loop_hz);
        sched.restart(std::time::Instant::now());

        for _ in 0..ticks {
            device.command_motor_current(pull)?;
            if let Some(r) = device.read()? {
                window.add(r.mot_ang_deg, r.ank_ang_deg, r.mot_vel_dps, r.ank_vel_dps, cfg);
            }
            sched.wait_next();
        }

        if let Some(zeros) = window.accept(cfg) {
            info!(
                "[Zeroing:{}] attempt {}: still {:.1}% of {} samples, motor0={:.2} ankle0={:.2}",
                side.side,
                attempt,
                window.still_fraction() * 100.0,
                window.samples,
                zeros.motor_deg,
                zeros.ankle_deg
            );
            return Ok(zeros);
        }
        warn!(
            "[Zeroing:{}] attempt {}/{} rejected: still {:.1}% of {} samples",
            side.side,
            attempt,
            cfg.max_attempts,
            window.still_fraction() * 100.0,
            window.samples
        );
    }

    device.command_motor_current(0)?;
    Err(ExoError::ZeroingFailed { side: side.side, attempts: cfg.max_attempts })
}
