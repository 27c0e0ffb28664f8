//! error.rs
//! Error kinds for construction, loop-local recovery and the remote surface.
//!
//! Construction errors (`ExoError`) abort startup before any thread runs.
//! Loop-local problems never surface here: the actuator loop absorbs and counts them.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::model::side::Side;

/// Failure while locating or parsing a transmission-ratio calibration file.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("cannot read calibration file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed calibration csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("calibration file has {found} rows, expected 3")]
    RowCount { found: usize },

    #[error("calibration row {row}: expected {expected} values, found {found}")]
    RowLength {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("calibration row {row}: {value:?} is not a number")]
    NotANumber { row: usize, value: String },

    #[error("transmission coefficients are not the derivative of the motor curve (row 2 = {found:?}, expected {expected:?})")]
    DerivativeMismatch { found: Vec<f64>, expected: Vec<f64> },

    #[error("no calibration file matching {pattern} in {dir:?}")]
    NotFound { dir: PathBuf, pattern: String },
}

/// Torque profile construction or lookup failure.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ProfileError {
    #[error("stride period must be positive")]
    ZeroStridePeriod,

    #[error("invalid profile timing: {0}")]
    InvalidTiming(&'static str),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("address {0:?} is already registered")]
    DuplicateAddress(String),

    #[error("no inbox registered for {0:?}")]
    UnknownAddressee(String),
}

/// Errors reported by a device handle or by the driver that opens it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },

    #[error("device {0} is closed")]
    Closed(u32),

    #[error("device i/o: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config validation failed: {0}")]
    Invalid(String),
}

/// Errors returned to a remote caller. The service keeps running after any of these.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    #[error("no thread named {0:?}")]
    UnknownAddressee(String),

    #[error("thread {thread:?} has no field {field:?}")]
    InvalidField { thread: String, field: String },

    #[error("service is shutting down")]
    ServiceDown,

    #[error("unknown method {0:?}")]
    UnknownMethod(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl RemoteError {
    /// Stable code carried on the wire next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            RemoteError::UnknownAddressee(_) => "unknown_addressee",
            RemoteError::InvalidField { .. } => "invalid_field",
            RemoteError::ServiceDown => "service_down",
            RemoteError::UnknownMethod(_) => "unknown_method",
            RemoteError::BadRequest(_) => "bad_request",
        }
    }
}

impl From<RouterError> for RemoteError {
    fn from(e: RouterError) -> Self {
        match e {
            RouterError::UnknownAddressee(a) | RouterError::DuplicateAddress(a) => {
                RemoteError::UnknownAddressee(a)
            }
        }
    }
}

/// Fatal errors raised while the supervisor builds the system.
#[derive(Debug, Error)]
pub enum ExoError {
    #[error("calibration load error: {0}")]
    CalibrationLoad(#[from] CalibrationError),

    #[error("device id {0} is not in the side map")]
    UnknownDevice(u32),

    #[error("port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },

    #[error("address {0:?} registered twice")]
    DuplicateAddress(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("profile: {0}")]
    Profile(#[from] ProfileError),

    #[error("zeroing failed on {side} after {attempts} attempts")]
    ZeroingFailed { side: Side, attempts: u32 },

    #[error("device: {0}")]
    Device(DeviceError),

    #[error("failed to spawn thread {name}: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("remote service: {0}")]
    Remote(String),

    #[error("log sink: {0}")]
    Sink(String),
}

impl From<DeviceError> for ExoError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::PortUnavailable { port, reason } => ExoError::PortUnavailable { port, reason },
            other => ExoError::Device(other),
        }
    }
}

impl From<RouterError> for ExoError {
    fn from(e: RouterError) -> Self {
        match e {
            RouterError::DuplicateAddress(a) => ExoError::DuplicateAddress(a),
            RouterError::UnknownAddressee(a) => ExoError::Remote(format!("unknown addressee {a:?}")),
        }
    }
}
