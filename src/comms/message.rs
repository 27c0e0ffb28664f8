//! Typed messages exchanged between threads. One message carries one complete update,
//! so a receiver never observes half of a gait estimate.

use serde::{Deserialize, Serialize};

use crate::{events::EventKind, model::side::Side};

/// Gait state for one side as of the latest heel-strike or toe-off.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaitEstimate {
    /// Monotonic seconds of the most recent heel-strike.
    pub hs_time: f64,
    /// Filtered stride duration in seconds.
    pub stride_period: f64,
    pub in_swing: bool,
    /// Peak torque carried along when remote updates are coupled to the gait stream.
    pub peak_torque: Option<f64>,
}

impl GaitEstimate {
    /// State before the first heel-strike: swinging, no assistance.
    pub fn initial(stride_period: f64) -> Self {
        Self { hs_time: 0.0, stride_period, in_swing: true, peak_torque: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakTorqueMsg {
    pub side: Side,
    pub torque_nm: f64,
}

/// Acknowledgement that an event changed; loops do not act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMsg {
    pub kind: EventKind,
    pub value: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MessageBody {
    GaitEstimate(GaitEstimate),
    PeakTorque(PeakTorqueMsg),
    Event(EventMsg),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sender: String,
    pub body: MessageBody,
}

impl Message {
    pub fn new(sender: &str, body: MessageBody) -> Self {
        Self { sender: sender.to_string(), body }
    }
}
