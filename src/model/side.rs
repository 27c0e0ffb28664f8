//! side.rs
//! Left/right tagging, per-device sign pairs and the device-ID → side table.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ExoError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn name(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    /// Router address of this side's actuator loop.
    pub fn address(&self) -> &'static str {
        match self {
            Side::Left => "exo_left",
            Side::Right => "exo_right",
        }
    }

    /// Position in per-side arrays: left 0, right 1.
    #[inline]
    pub fn index(&self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn from_address(address: &str) -> Option<Side> {
        Side::BOTH.into_iter().find(|s| s.address() == address)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Ok(Side::Left),
            "right" | "r" => Ok(Side::Right),
            other => Err(format!("unknown side {other:?}")),
        }
    }
}

/// Mounting convention of one actuator, resolved from its device ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideConfig {
    pub side: Side,
    pub motor_sign: i8,
    pub ank_enc_sign: i8,
}

/// One row of the device table: serial ID, side, signs and the port it is wired to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: u32,
    pub side: Side,
    pub motor_sign: i8,
    pub ank_enc_sign: i8,
    pub port: String,
}

impl DeviceEntry {
    pub fn side_config(&self) -> SideConfig {
        SideConfig {
            side: self.side,
            motor_sign: self.motor_sign,
            ank_enc_sign: self.ank_enc_sign,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceMap {
    entries: Vec<DeviceEntry>,
}

impl DeviceMap {
    pub fn new(entries: Vec<DeviceEntry>) -> Result<Self, ConfigError> {
        for (i, e) in entries.iter().enumerate() {
            if !matches!(e.motor_sign, -1 | 1) || !matches!(e.ank_enc_sign, -1 | 1) {
                return Err(ConfigError::Invalid(format!(
                    "device {}: signs must be -1 or +1 (motor_sign={}, ank_enc_sign={})",
                    e.id, e.motor_sign, e.ank_enc_sign
                )));
            }
            if entries[..i].iter().any(|prev| prev.id == e.id) {
                return Err(ConfigError::Invalid(format!("device id {} listed twice", e.id)));
            }
        }
        Ok(Self { entries })
    }

    /// Resolves a serial ID reported by an opened device.
    pub fn lookup(&self, id: u32) -> Result<SideConfig, ExoError> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(DeviceEntry::side_config)
            .ok_or(ExoError::UnknownDevice(id))
    }

    pub fn entries(&self) -> &[DeviceEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32, side: Side, motor_sign: i8) -> DeviceEntry {
        DeviceEntry { id, side, motor_sign, ank_enc_sign: 1, port: format!("sim{id}") }
    }

    #[test]
    fn unmapped_id_is_unknown_device() {
        let map = DeviceMap::new(vec![entry(0xC0CA, Side::Left, -1)]).unwrap();
        assert_eq!(map.lookup(0xC0CA).unwrap().side, Side::Left);
        assert!(matches!(map.lookup(42), Err(ExoError::UnknownDevice(42))));
    }

    #[test]
    fn rejects_bad_signs_and_duplicate_ids() {
        assert!(DeviceMap::new(vec![entry(1, Side::Left, 0)]).is_err());
        assert!(DeviceMap::new(vec![entry(1, Side::Left, 1), entry(1, Side::Right, 1)]).is_err());
    }

    #[test]
    fn addresses_round_trip() {
        for side in Side::BOTH {
            assert_eq!(Side::from_address(side.address()), Some(side));
            assert_eq!(side.name().parse::<Side>().unwrap(), side);
        }
        assert_eq!(Side::from_address("gait"), None);
    }
}
