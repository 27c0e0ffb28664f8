//! config.rs
//! Run configuration loaded from TOML. Every section has defaults, so an empty
//! file (or no file) gives the bench setup: two simulated boots at 1 kHz.
//!
//! ```toml
//! [control]
//! loop_hz = 1000.0
//! max_allowable_current_ma = 20000
//!
//! [[devices]]
//! id = 49345
//! side = "left"
//! motor_sign = -1
//! ank_enc_sign = 1
//! port = "/dev/ttyACM0"
//! ```

use std::{fs, path::{Path, PathBuf}};

use serde::{Deserialize, Serialize};

use crate::{
    device::Gains,
    error::ConfigError,
    model::side::{DeviceEntry, DeviceMap, Side},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub loop_hz: f64,
    pub log_hz: f64,
    pub bias_current_ma: i32,
    pub max_allowable_current_ma: i32,
    /// Measured current above this is treated as a failing device.
    pub current_antispike_ma: f64,
    pub efficiency: f64,
    pub kt_nm_per_a: f64,
    pub baud: u32,
    pub gains: Gains,
    /// Pin both actuator threads to this core when set.
    pub cpu_core: Option<usize>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            loop_hz: 1000.0,
            log_hz: 100.0,
            bias_current_ma: 500,
            max_allowable_current_ma: 20_000,
            current_antispike_ma: 30_000.0,
            efficiency: 0.9,
            kt_nm_per_a: 0.146,
            baud: 230_400,
            gains: Gains::default(),
            cpu_core: None,
        }
    }
}

/// Spline timings in percent of stride.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub rise: f64,
    pub peak: f64,
    pub fall: f64,
    pub toe_off: f64,
    pub grid: usize,
    pub holding_torque_nm: f64,
    pub initial_peak_torque_nm: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            rise: 15.0,
            peak: 54.0,
            fall: 12.0,
            toe_off: 67.0,
            grid: 10_000,
            holding_torque_nm: 2.0,
            initial_peak_torque_nm: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionConfig {
    pub theta_min_deg: f64,
    pub theta_max_deg: f64,
    pub bins: usize,
    pub n_min: f64,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self { theta_min_deg: 0.0, theta_max_deg: 180.0, bins: 10_000, n_min: 10.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    pub max_case_temp_c: f64,
    pub max_winding_temp_c: f64,
    pub temp_antispike_c: f64,
    pub max_temp_jump_c: f64,
    pub ambient_c: f64,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            max_case_temp_c: 75.0,
            max_winding_temp_c: 110.0,
            temp_antispike_c: 100.0,
            max_temp_jump_c: 5.0,
            ambient_c: 25.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GaitConfig {
    pub hs_threshold_n: f64,
    pub to_threshold_n: f64,
    pub filter_size: usize,
    pub rejection_fraction: f64,
    pub initial_stride_period_s: f64,
    pub recv_timeout_ms: u64,
    /// Re-seed a filter after this many rejections in a row (walking speed changed). 0 disables.
    pub max_consecutive_rejections: u32,
    pub topic_left: String,
    pub topic_right: String,
}

impl Default for GaitConfig {
    fn default() -> Self {
        Self {
            hs_threshold_n: 80.0,
            to_threshold_n: 30.0,
            filter_size: 10,
            rejection_fraction: 0.5,
            initial_stride_period_s: 1.0,
            recv_timeout_ms: 5,
            max_consecutive_rejections: 5,
            topic_left: "left".into(),
            topic_right: "right".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroingConfig {
    pub pull_current_ma: i32,
    pub window_s: f64,
    pub motor_velocity_threshold_dps: f64,
    pub ankle_velocity_threshold_dps: f64,
    pub still_fraction: f64,
    pub max_attempts: u32,
}

impl Default for ZeroingConfig {
    fn default() -> Self {
        Self {
            pull_current_ma: 1_000,
            window_s: 1.0,
            motor_velocity_threshold_dps: 100.0,
            ankle_velocity_threshold_dps: 1.0,
            still_fraction: 0.95,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub directory: PathBuf,
    pub prefix: String,
    pub override_left: Option<PathBuf>,
    pub override_right: Option<PathBuf>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("calibration"),
            prefix: "TR_coefs".into(),
            override_left: None,
            override_right: None,
        }
    }
}

impl CalibrationConfig {
    pub fn override_for(&self, side: Side) -> Option<&Path> {
        match side {
            Side::Left => self.override_left.as_deref(),
            Side::Right => self.override_right.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    pub bind: String,
    /// Route peak torque through the gait estimator so it arrives inside the gait message.
    pub couple_torque_to_gait: bool,
    pub poll_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:5556".into(),
            couple_torque_to_gait: false,
            poll_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub ring_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { directory: PathBuf::from("data/logs"), ring_capacity: 4096 }
    }
}

/// Synthetic plant and force plates used when no hardware is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub enabled: bool,
    pub stride_period_s: f64,
    pub stance_fraction: f64,
    pub peak_grf_n: f64,
    pub plate_hz: f64,
    pub case_temp_c: f64,
    /// Stamp used for the generated calibration files.
    pub calibration_stamp: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stride_period_s: 1.2,
            stance_fraction: 0.62,
            peak_grf_n: 700.0,
            plate_hz: 500.0,
            case_temp_c: 30.0,
            calibration_stamp: "2024_01_01_00_00".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExoConfig {
    pub control: ControlConfig,
    pub profile: ProfileConfig,
    pub transmission: TransmissionConfig,
    pub thermal: ThermalConfig,
    pub gait: GaitConfig,
    pub zeroing: ZeroingConfig,
    pub calibration: CalibrationConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
    pub simulation: SimulationConfig,
    pub devices: Vec<DeviceEntry>,
    pub run_duration_s: Option<f64>,
}

impl Default for ExoConfig {
    fn default() -> Self {
        Self {
            control: ControlConfig::default(),
            profile: ProfileConfig::default(),
            transmission: TransmissionConfig::default(),
            thermal: ThermalConfig::default(),
            gait: GaitConfig::default(),
            zeroing: ZeroingConfig::default(),
            calibration: CalibrationConfig::default(),
            remote: RemoteConfig::default(),
            logging: LoggingConfig::default(),
            simulation: SimulationConfig::default(),
            devices: default_devices(),
            run_duration_s: None,
        }
    }
}

fn default_devices() -> Vec<DeviceEntry> {
    vec![
        DeviceEntry {
            id: 0xC0CA,
            side: Side::Left,
            motor_sign: -1,
            ank_enc_sign: -1,
            port: "sim:left".into(),
        },
        DeviceEntry {
            id: 0xC0CB,
            side: Side::Right,
            motor_sign: 1,
            ank_enc_sign: 1,
            port: "sim:right".into(),
        },
    ]
}

impl ExoConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: ExoConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn device_map(&self) -> Result<DeviceMap, ConfigError> {
        DeviceMap::new(self.devices.clone())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let c = &self.control;
        if !(c.loop_hz > 0.0) || !(c.log_hz > 0.0) || c.log_hz > c.loop_hz {
            return invalid(format!("rates must satisfy 0 < log_hz <= loop_hz (got {} / {})", c.log_hz, c.loop_hz));
        }
        if c.bias_current_ma <= 0 || c.bias_current_ma >= c.max_allowable_current_ma {
            return invalid(format!(
                "need 0 < bias_current_ma < max_allowable_current_ma (got {} / {})",
                c.bias_current_ma, c.max_allowable_current_ma
            ));
        }
        if !(c.efficiency > 0.0 && c.efficiency <= 1.0) || !(c.kt_nm_per_a > 0.0) {
            return invalid("efficiency must be in (0, 1] and kt positive".into());
        }

        let p = &self.profile;
        if !(p.rise > 0.0) || !(p.fall > 0.0) || p.peak - p.rise <= 0.0 {
            return invalid("profile needs rise > 0, fall > 0 and peak > rise".into());
        }
        if !(p.peak + p.fall <= p.toe_off && p.toe_off < 100.0) {
            return invalid("profile needs peak + fall <= toe_off < 100".into());
        }
        if p.grid < 2 {
            return invalid("profile grid needs at least 2 samples".into());
        }

        let t = &self.transmission;
        if !(t.theta_max_deg > t.theta_min_deg) || t.bins < 2 || !(t.n_min > 0.0) {
            return invalid("transmission table needs theta_max > theta_min, bins >= 2, n_min > 0".into());
        }

        let g = &self.gait;
        if !(g.hs_threshold_n > g.to_threshold_n) {
            return invalid("heel-strike threshold must exceed toe-off threshold".into());
        }
        if g.filter_size == 0 || !(g.initial_stride_period_s > 0.0) {
            return invalid("gait filter needs size >= 1 and a positive initial period".into());
        }
        if g.topic_left == g.topic_right {
            return invalid("force-plate topics must differ".into());
        }

        let z = &self.zeroing;
        if z.max_attempts == 0 || !(z.window_s > 0.0) || !(0.0..=1.0).contains(&z.still_fraction) {
            return invalid("zeroing needs attempts >= 1, a positive window, still_fraction in [0, 1]".into());
        }

        if self.logging.ring_capacity == 0 {
            return invalid("logging ring_capacity must be positive".into());
        }

        for side in Side::BOTH {
            if self.devices.iter().filter(|d| d.side == side).count() > 1 {
                return invalid(format!("more than one device mapped to {side}"));
            }
        }
        self.device_map()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = ExoConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.gait.to_threshold_n, 30.0);
        assert_eq!(cfg.control.gains, Gains { kp: 40, ki: 400, kd: 0, ff: 128 });
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = ExoConfig::from_toml_str(
            r#"
run_duration_s = 12.5

[profile]
peak = 50.0

[[devices]]
id = 7
side = "right"
motor_sign = 1
ank_enc_sign = -1
port = "/dev/ttyACM1"
"#,
        )
        .unwrap();
        assert_eq!(cfg.profile.peak, 50.0);
        assert_eq!(cfg.profile.rise, 15.0);
        assert_eq!(cfg.devices.len(), 1);
        assert_eq!(cfg.run_duration_s, Some(12.5));
    }

    #[test]
    fn rejects_broken_profile_timing() {
        let err = ExoConfig::from_toml_str("[profile]\npeak = 60.0\nfall = 12.0\ntoe_off = 67.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bias_above_max() {
        let err = ExoConfig::from_toml_str("[control]\nbias_current_ma = 25000\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_syntax_errors() {
        assert!(matches!(ExoConfig::from_toml_str("[control"), Err(ConfigError::Parse(_))));
    }
}
