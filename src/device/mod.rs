//! Actuator device seam.
//!
//! The vendor driver is an external collaborator: the controller only needs to open a
//! port, stream telemetry, set the current-loop gains and command motor current.
//! `sim` provides a stand-in plant for bench runs and tests.

pub mod sim;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// One telemetry frame, already in engineering units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceReading {
    pub state_time_ms: u64,
    pub temperature_c: f64,
    pub mot_cur_ma: f64,
    pub mot_volt_mv: f64,
    pub batt_volt_mv: f64,
    pub batt_curr_ma: f64,
    pub ank_ang_deg: f64,
    pub mot_ang_deg: f64,
    pub ank_vel_dps: f64,
    pub mot_vel_dps: f64,
    pub accel: [f64; 3],
    pub gyro: [f64; 3],
}

/// Current-loop gains sent to the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gains {
    pub kp: u32,
    pub ki: u32,
    pub kd: u32,
    pub ff: u32,
}

impl Default for Gains {
    fn default() -> Self {
        Self { kp: 40, ki: 400, kd: 0, ff: 128 }
    }
}

/// An opened actuator. Owned by exactly one actuator loop.
pub trait ExoDevice: Send {
    /// Serial ID reported by the hardware.
    fn id(&self) -> u32;

    fn start_streaming(&mut self, freq_hz: u32) -> Result<(), DeviceError>;

    fn set_gains(&mut self, gains: Gains) -> Result<(), DeviceError>;

    /// Latest frame, or `None` when nothing new arrived since the previous call.
    /// Must not block longer than a fraction of a control tick.
    fn read(&mut self) -> Result<Option<DeviceReading>, DeviceError>;

    fn command_motor_current(&mut self, current_ma: i32) -> Result<(), DeviceError>;

    fn stop_motor(&mut self) -> Result<(), DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError>;
}

/// Opens device handles by port name.
pub trait DeviceDriver {
    fn open(&self, port: &str, baud: u32) -> Result<Box<dyn ExoDevice>, DeviceError>;
}
