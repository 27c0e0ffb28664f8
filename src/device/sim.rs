//! sim.rs
//! Simulated exoboot for bench runs and tests.
//! - Motor current tracks the last command with a little sensor noise
//! - The boot sits still unless motion is injected (zeroing sees a quiet ankle)
//! - Faults (hot case, current spike, stale frames) are injected through `SimHandle`

use std::{
    collections::{HashMap, VecDeque},
    fs,
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

use log::info;
use parking_lot::Mutex;
use rand::random_range;

use crate::config::ExoConfig;
use crate::device::{DeviceDriver, DeviceReading, ExoDevice, Gains};
use crate::error::{CalibrationError, DeviceError};
use crate::model::calibration::{CalibrationRecord, calibration_file_name, find_latest};

const COMMAND_LOG_CAPACITY: usize = 200_000;

/// Motor angle vs ankle angle of a bench boot, highest degree first. N(θ) ≈ 22 near θ = 0.
pub const BENCH_MOTOR_CURVE: [f64; 4] = [3.0e-4, -0.08, 22.0, 0.0];
/// Raw encoder angle at maximum dorsiflexion of a bench boot.
pub const BENCH_DORSI_OFFSET: f64 = 20.0;
/// Raw encoder angle a bench boot rests at (before the per-side encoder sign).
pub const BENCH_ANKLE_DEG: f64 = 30.0;

#[derive(Debug, Clone)]
pub struct SimState {
    pub case_temp_c: f64,
    pub battery_mv: f64,
    pub ankle_deg: f64,
    pub motor_deg: f64,
    /// Extra ankle/motor speed, e.g. a wearer who does not stand still during zeroing.
    pub motion_dps: f64,
    pub current_noise_ma: f64,
    case_temp_once: VecDeque<f64>,
    current_once: VecDeque<f64>,
    stale_reads: u32,
    last_command_ma: i32,
    commands: VecDeque<i32>,
    gains: Option<Gains>,
    streaming_hz: Option<u32>,
    stopped: bool,
    closed: bool,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            case_temp_c: 30.0,
            battery_mv: 36_000.0,
            ankle_deg: 0.0,
            motor_deg: 0.0,
            motion_dps: 0.0,
            current_noise_ma: 5.0,
            case_temp_once: VecDeque::new(),
            current_once: VecDeque::new(),
            stale_reads: 0,
            last_command_ma: 0,
            commands: VecDeque::new(),
            gains: None,
            streaming_hz: None,
            stopped: false,
            closed: false,
        }
    }
}

/// Test/bench side door into a simulated boot.
#[derive(Debug, Clone, Default)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    pub fn new(state: SimState) -> Self {
        Self { state: Arc::new(Mutex::new(state)) }
    }

    pub fn set_case_temp(&self, temp_c: f64) {
        self.state.lock().case_temp_c = temp_c;
    }

    /// Next read reports this case temperature, then the steady value returns.
    pub fn inject_case_temp_once(&self, temp_c: f64) {
        self.state.lock().case_temp_once.push_back(temp_c);
    }

    pub fn inject_current_once(&self, current_ma: f64) {
        self.state.lock().current_once.push_back(current_ma);
    }

    pub fn inject_stale_reads(&self, n: u32) {
        self.state.lock().stale_reads += n;
    }

    pub fn set_motion(&self, dps: f64) {
        self.state.lock().motion_dps = dps;
    }

    pub fn set_angles(&self, ankle_deg: f64, motor_deg: f64) {
        let mut s = self.state.lock();
        s.ankle_deg = ankle_deg;
        s.motor_deg = motor_deg;
    }

    pub fn commands(&self) -> Vec<i32> {
        self.state.lock().commands.iter().copied().collect()
    }

    pub fn last_command(&self) -> Option<i32> {
        self.state.lock().commands.back().copied()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    pub fn gains(&self) -> Option<Gains> {
        self.state.lock().gains
    }

    pub fn streaming_hz(&self) -> Option<u32> {
        self.state.lock().streaming_hz
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

pub struct SimulatedExoboot {
    id: u32,
    handle: SimHandle,
    opened_at: Instant,
}

impl SimulatedExoboot {
    pub fn new(id: u32, handle: SimHandle) -> Self {
        Self { id, handle, opened_at: Instant::now() }
    }

    fn ensure_open(&self, s: &SimState) -> Result<(), DeviceError> {
        if s.closed { Err(DeviceError::Closed(self.id)) } else { Ok(()) }
    }
}

impl ExoDevice for SimulatedExoboot {
    fn id(&self) -> u32 {
        self.id
    }

    fn start_streaming(&mut self, freq_hz: u32) -> Result<(), DeviceError> {
        let mut s = self.handle.state.lock();
        self.ensure_open(&s)?;
        s.streaming_hz = Some(freq_hz);
        Ok(())
    }

    fn set_gains(&mut self, gains: Gains) -> Result<(), DeviceError> {
        let mut s = self.handle.state.lock();
        self.ensure_open(&s)?;
        s.gains = Some(gains);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<DeviceReading>, DeviceError> {
        let mut s = self.handle.state.lock();
        self.ensure_open(&s)?;
        if s.stale_reads > 0 {
            s.stale_reads -= 1;
            return Ok(None);
        }

        let noise = s.current_noise_ma;
        let mot_cur_ma = match s.current_once.pop_front() {
            Some(spike) => spike,
            None if noise > 0.0 => s.last_command_ma as f64 + random_range(-noise..noise),
            None => s.last_command_ma as f64,
        };
        let temperature_c = s.case_temp_once.pop_front().unwrap_or(s.case_temp_c);
        let jitter = || random_range(-0.2..0.2);

        Ok(Some(DeviceReading {
            state_time_ms: self.opened_at.elapsed().as_millis() as u64,
            temperature_c,
            mot_cur_ma,
            mot_volt_mv: mot_cur_ma * 0.376,
            batt_volt_mv: s.battery_mv,
            batt_curr_ma: mot_cur_ma.abs() * 0.1,
            ank_ang_deg: s.ankle_deg,
            mot_ang_deg: s.motor_deg,
            ank_vel_dps: s.motion_dps + jitter() * 0.5,
            mot_vel_dps: s.motion_dps + jitter(),
            accel: [0.0, 0.0, 9.81],
            gyro: [jitter(), jitter(), jitter()],
        }))
    }

    fn command_motor_current(&mut self, current_ma: i32) -> Result<(), DeviceError> {
        let mut s = self.handle.state.lock();
        self.ensure_open(&s)?;
        s.last_command_ma = current_ma;
        s.stopped = false;
        if s.commands.len() >= COMMAND_LOG_CAPACITY {
            s.commands.pop_front();
        }
        s.commands.push_back(current_ma);
        Ok(())
    }

    fn stop_motor(&mut self) -> Result<(), DeviceError> {
        let mut s = self.handle.state.lock();
        self.ensure_open(&s)?;
        s.last_command_ma = 0;
        s.stopped = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        let mut s = self.handle.state.lock();
        s.closed = true;
        s.streaming_hz = None;
        Ok(())
    }
}

/// Driver that hands out simulated boots for registered ports.
#[derive(Default)]
pub struct SimDriver {
    ports: Mutex<HashMap<String, (u32, SimHandle, bool)>>,
}

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a boot reporting `id` to `port`. Returns its fault-injection handle.
    pub fn attach(&self, port: &str, id: u32) -> SimHandle {
        let handle = SimHandle::default();
        self.ports.lock().insert(port.to_string(), (id, handle.clone(), false));
        handle
    }

    pub fn attach_with(&self, port: &str, id: u32, state: SimState) -> SimHandle {
        let handle = SimHandle::new(state);
        self.ports.lock().insert(port.to_string(), (id, handle.clone(), false));
        handle
    }

    pub fn handle(&self, port: &str) -> Option<SimHandle> {
        self.ports.lock().get(port).map(|(_, h, _)| h.clone())
    }
}

impl DeviceDriver for SimDriver {
    fn open(&self, port: &str, _baud: u32) -> Result<Box<dyn ExoDevice>, DeviceError> {
        let mut ports = self.ports.lock();
        let Some((id, handle, opened)) = ports.get_mut(port) else {
            return Err(DeviceError::PortUnavailable {
                port: port.to_string(),
                reason: "no device attached".into(),
            });
        };
        if *opened {
            return Err(DeviceError::PortUnavailable {
                port: port.to_string(),
                reason: "already open".into(),
            });
        }
        *opened = true;
        Ok(Box::new(SimulatedExoboot::new(*id, handle.clone())))
    }
}

/// Attaches one simulated boot per configured device, resting at a mid-range ankle angle.
pub fn bench_driver(cfg: &ExoConfig) -> SimDriver {
    let driver = SimDriver::new();
    for dev in &cfg.devices {
        let state = SimState {
            case_temp_c: cfg.simulation.case_temp_c,
            ankle_deg: BENCH_ANKLE_DEG * f64::from(dev.ank_enc_sign),
            ..Default::default()
        };
        driver.attach_with(&dev.port, dev.id, state);
    }
    driver
}

/// Writes a calibration file for every side that has none yet. Returns the files written.
pub fn write_bench_calibration(cfg: &ExoConfig) -> Result<Vec<PathBuf>, CalibrationError> {
    let dir = &cfg.calibration.directory;
    fs::create_dir_all(dir).map_err(|source| CalibrationError::Io { path: dir.clone(), source })?;

    let record = CalibrationRecord::from_motor_curve(BENCH_MOTOR_CURVE.to_vec(), BENCH_DORSI_OFFSET)?;
    let mut written = Vec::new();
    for dev in &cfg.devices {
        if cfg.calibration.override_for(dev.side).is_some()
            || find_latest(dir, &cfg.calibration.prefix, dev.side).is_ok()
        {
            continue;
        }
        let path = dir.join(calibration_file_name(&cfg.calibration.prefix, dev.side, &cfg.simulation.calibration_stamp));
        record.save(&path)?;
        info!("[Sim] wrote bench calibration {:?}", path);
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn bench_calibration_is_written_once() {
        let dir = TempDir::new().unwrap();
        let mut cfg = ExoConfig::default();
        cfg.calibration.directory = dir.path().to_path_buf();
        assert_eq!(write_bench_calibration(&cfg).unwrap().len(), 2);
        assert!(write_bench_calibration(&cfg).unwrap().is_empty());
        let rec = CalibrationRecord::load(&find_latest(dir.path(), "TR_coefs", crate::model::side::Side::Right).unwrap()).unwrap();
        assert!((rec.transmission_ratio(0.0) - 22.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_or_busy_port_is_unavailable() {
        let driver = SimDriver::new();
        driver.attach("sim:left", 1);
        assert!(driver.open("sim:left", 230_400).is_ok());
        assert!(matches!(driver.open("sim:left", 230_400), Err(DeviceError::PortUnavailable { .. })));
        assert!(matches!(driver.open("/dev/ttyACM9", 230_400), Err(DeviceError::PortUnavailable { .. })));
    }

    #[test]
    fn one_shot_faults_apply_to_a_single_read() {
        let driver = SimDriver::new();
        let handle = driver.attach("p", 3);
        let mut dev = driver.open("p", 0).unwrap();
        handle.inject_stale_reads(1);
        handle.inject_case_temp_once(80.0);

        assert!(dev.read().unwrap().is_none());
        assert_eq!(dev.read().unwrap().unwrap().temperature_c, 80.0);
        assert_eq!(dev.read().unwrap().unwrap().temperature_c, 30.0);
    }

    #[test]
    fn closed_device_refuses_commands() {
        let driver = SimDriver::new();
        let handle = driver.attach("p", 3);
        let mut dev = driver.open("p", 0).unwrap();
        dev.command_motor_current(-700).unwrap();
        assert_eq!(handle.last_command(), Some(-700));
        dev.close().unwrap();
        assert!(handle.is_closed());
        assert_eq!(dev.command_motor_current(0), Err(DeviceError::Closed(3)));
    }
}
