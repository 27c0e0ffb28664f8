//! Per-side data: which boot is which, and its transmission calibration.
pub mod calibration;
pub mod side;
