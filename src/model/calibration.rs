//! calibration.rs
//! Per-side transmission-ratio calibration produced by the characterization tool.
//!
//! File layout (CSV, no header, three rows):
//! 1. motor-angle polynomial, highest degree first
//! 2. its analytic derivative (transmission ratio polynomial)
//! 3. dorsi offset in degrees
//!
//! File name: `<prefix>_<side>_<YYYY_MM_DD_HH_MM>.csv`. The newest stamp wins.

use std::{
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, WriterBuilder};

use crate::{error::CalibrationError, model::side::Side};

const DERIVATIVE_REL_TOL: f64 = 1e-6;

/// Horner evaluation, coefficients highest degree first.
#[inline]
pub fn polyval(coefs: &[f64], x: f64) -> f64 {
    coefs.iter().fold(0.0, |acc, c| acc * x + c)
}

/// Analytic derivative, coefficients highest degree first.
pub fn polyder(coefs: &[f64]) -> Vec<f64> {
    let n = coefs.len();
    if n <= 1 {
        return vec![0.0];
    }
    coefs[..n - 1]
        .iter()
        .enumerate()
        .map(|(i, c)| c * (n - 1 - i) as f64)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRecord {
    pub motor_curve_coefs: Vec<f64>,
    pub tr_coefs: Vec<f64>,
    pub dorsi_offset: f64,
}

impl CalibrationRecord {
    /// Builds a record and checks that `tr_coefs` is the derivative of `motor_curve_coefs`.
    pub fn new(
        motor_curve_coefs: Vec<f64>,
        tr_coefs: Vec<f64>,
        dorsi_offset: f64,
    ) -> Result<Self, CalibrationError> {
        if motor_curve_coefs.len() < 2 {
            return Err(CalibrationError::RowLength {
                row: 1,
                expected: 2,
                found: motor_curve_coefs.len(),
            });
        }
        if tr_coefs.len() != motor_curve_coefs.len() - 1 {
            return Err(CalibrationError::RowLength {
                row: 2,
                expected: motor_curve_coefs.len() - 1,
                found: tr_coefs.len(),
            });
        }

        let expected = polyder(&motor_curve_coefs);
        let matches = expected
            .iter()
            .zip(&tr_coefs)
            .all(|(e, f)| (e - f).abs() <= DERIVATIVE_REL_TOL * e.abs().max(1.0));
        if !matches {
            return Err(CalibrationError::DerivativeMismatch { found: tr_coefs, expected });
        }

        Ok(Self { motor_curve_coefs, tr_coefs, dorsi_offset })
    }

    /// Convenience for a fitted motor curve: derives the TR row.
    pub fn from_motor_curve(motor_curve_coefs: Vec<f64>, dorsi_offset: f64) -> Result<Self, CalibrationError> {
        let tr = polyder(&motor_curve_coefs);
        Self::new(motor_curve_coefs, tr, dorsi_offset)
    }

    pub fn from_reader<R: Read>(rdr: R) -> Result<Self, CalibrationError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(rdr);

        let mut rows: Vec<Vec<f64>> = Vec::with_capacity(3);
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            let row = record
                .iter()
                .filter(|f| !f.is_empty())
                .map(|f| {
                    f.parse::<f64>().map_err(|_| CalibrationError::NotANumber {
                        row: i + 1,
                        value: f.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if !row.is_empty() {
                rows.push(row);
            }
        }

        if rows.len() != 3 {
            return Err(CalibrationError::RowCount { found: rows.len() });
        }
        let offset_row = rows.pop().unwrap_or_default();
        if offset_row.len() != 1 {
            return Err(CalibrationError::RowLength { row: 3, expected: 1, found: offset_row.len() });
        }
        let tr = rows.pop().unwrap_or_default();
        let motor = rows.pop().unwrap_or_default();
        Self::new(motor, tr, offset_row[0])
    }

    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let file = File::open(path).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }

    /// Writes the three-row file format; used by tooling and simulation setups.
    pub fn save(&self, path: &Path) -> Result<(), CalibrationError> {
        let mut wtr = WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;
        wtr.write_record(self.motor_curve_coefs.iter().map(|c| format!("{c:e}")))?;
        wtr.write_record(self.tr_coefs.iter().map(|c| format!("{c:e}")))?;
        wtr.write_record([format!("{:e}", self.dorsi_offset)])?;
        wtr.flush().map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn motor_angle(&self, ankle_deg: f64) -> f64 {
        polyval(&self.motor_curve_coefs, ankle_deg)
    }

    pub fn transmission_ratio(&self, ankle_deg: f64) -> f64 {
        polyval(&self.tr_coefs, ankle_deg)
    }
}

/// `YYYY_MM_DD_HH_MM` parsed into a sortable tuple.
type Stamp = (u32, u32, u32, u32, u32);

fn parse_stamp(s: &str) -> Option<Stamp> {
    let parts: Vec<u32> = s
        .split('_')
        .map(|p| p.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [y, mo, d, h, mi] if (1..=12).contains(mo) && (1..=31).contains(d) && *h < 24 && *mi < 60 => {
            Some((*y, *mo, *d, *h, *mi))
        }
        _ => None,
    }
}

pub fn calibration_file_name(prefix: &str, side: Side, stamp: &str) -> String {
    format!("{prefix}_{}_{stamp}.csv", side.name())
}

/// Newest `<prefix>_<side>_<stamp>.csv` in `dir`, by parsed timestamp.
pub fn find_latest(dir: &Path, prefix: &str, side: Side) -> Result<PathBuf, CalibrationError> {
    let head = format!("{prefix}_{}_", side.name());
    let entries = fs::read_dir(dir).map_err(|source| CalibrationError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut best: Option<(Stamp, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stamp) = name
            .strip_prefix(&head)
            .and_then(|rest| rest.strip_suffix(".csv"))
            .and_then(parse_stamp)
        else {
            continue;
        };
        if best.as_ref().is_none_or(|(b, _)| stamp > *b) {
            best = Some((stamp, path));
        }
    }

    best.map(|(_, p)| p).ok_or_else(|| CalibrationError::NotFound {
        dir: dir.to_path_buf(),
        pattern: format!("{head}YYYY_MM_DD_HH_MM.csv"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn derivative_round_trip_matches_tr_row() {
        let motor = vec![-2.1e-4, 0.031, 12.5, -40.0];
        let rec = CalibrationRecord::from_motor_curve(motor.clone(), 96.0).unwrap();
        let tr = polyder(&motor);
        for theta in [0.0, 7.5, 33.3, 90.0, 179.9] {
            assert!((polyval(&tr, theta) - rec.transmission_ratio(theta)).abs() < 1e-9);
        }
    }

    #[test]
    fn parses_three_row_file() {
        let csv = "-1e-4, 0.02, 15.0, 3.0\n-3e-4, 0.04, 15.0\n88.5\n";
        let rec = CalibrationRecord::from_reader(Cursor::new(csv)).unwrap();
        assert_eq!(rec.motor_curve_coefs.len(), 4);
        assert_eq!(rec.dorsi_offset, 88.5);
    }

    #[test]
    fn rejects_non_derivative_tr_row() {
        let csv = "-1e-4,0.02,15.0,3.0\n-3e-4,0.04,14.0\n88.5\n";
        assert!(matches!(
            CalibrationRecord::from_reader(Cursor::new(csv)),
            Err(CalibrationError::DerivativeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            CalibrationRecord::from_reader(Cursor::new("1,2,x,4\n3,4,2\n1\n")),
            Err(CalibrationError::NotANumber { row: 1, .. })
        ));
        assert!(matches!(
            CalibrationRecord::from_reader(Cursor::new("1,2,3,4\n3,4,3\n")),
            Err(CalibrationError::RowCount { found: 2 })
        ));
    }

    #[test]
    fn picks_newest_stamp_for_side() {
        let dir = TempDir::new().unwrap();
        let rec = CalibrationRecord::from_motor_curve(vec![0.001, 0.0, 20.0, 0.0], 90.0).unwrap();
        for name in [
            "TR_coefs_left_2024_03_01_09_15.csv",
            "TR_coefs_left_2024_11_20_08_00.csv",
            "TR_coefs_left_2024_02_28_23_59.csv",
            "TR_coefs_right_2025_01_01_00_00.csv",
            "TR_coefs_left_notastamp.csv",
        ] {
            rec.save(&dir.path().join(name)).unwrap();
        }

        let latest = find_latest(dir.path(), "TR_coefs", Side::Left).unwrap();
        assert!(latest.ends_with("TR_coefs_left_2024_11_20_08_00.csv"));
        let loaded = CalibrationRecord::load(&latest).unwrap();
        assert!((loaded.dorsi_offset - 90.0).abs() < 1e-12);

        assert!(matches!(
            find_latest(dir.path(), "other", Side::Right),
            Err(CalibrationError::NotFound { .. })
        ));
    }
}
