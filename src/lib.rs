//! On-board controller for a bilateral ankle exoskeleton.
//!
//! Two hard real-time actuator loops (one per ankle) turn a gait-phase estimate
//! into motor current through a calibrated transmission and a four-point torque
//! profile, under thermal and current safety limits. A gait estimator feeds them
//! from force plates, a remote service lets the operator pause, log and retune
//! peak torque, and a supervisor wires everything together.

pub mod clock;
pub mod comms;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod events;
pub mod gait;
pub mod model;
pub mod supervisor;
pub mod utils;
