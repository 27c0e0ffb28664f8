//! Gait phase estimation from force plates.

pub mod estimator;
pub mod filter;
pub mod force_plate;
