//! force_plate.rs
//! Force-plate stream seen by the gait estimator.
//! - `ForcePlateSubscriber`: latest vertical force per topic, bounded wait
//! - `ChannelSubscriber`: subscriber over a crossbeam channel
//! - `SyntheticForcePlate`: walking-like ground-reaction force for bench runs
//!
//! Values are strings as published; compression is negative. An empty value means
//! the publisher had no new sample.

use std::{
    f64::consts::PI,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use log::{debug, info};
use rand::random_range;

use crate::{
    clock::MonotonicClock,
    config::SimulationConfig,
    error::ExoError,
    events::Events,
    utils::scheduler::DeadlineScheduler,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ForceMessage {
    pub topic: String,
    pub value: String,
    /// Publisher time stamp, seconds.
    pub stamp: f64,
}

pub trait ForcePlateSubscriber: Send {
    /// Next message, or `None` when nothing arrived within `timeout`.
    fn get_message(&mut self, timeout: Duration) -> Option<ForceMessage>;
}

pub struct ChannelSubscriber {
    rx: Receiver<ForceMessage>,
}

impl ChannelSubscriber {
    pub fn new(rx: Receiver<ForceMessage>) -> Self {
        Self { rx }
    }

    /// Bounded channel with its subscriber end.
    pub fn pair(capacity: usize) -> (Sender<ForceMessage>, Self) {
        let (tx, rx) = bounded(capacity);
        (tx, Self::new(rx))
    }
}

impl ForcePlateSubscriber for ChannelSubscriber {
    fn get_message(&mut self, timeout: Duration) -> Option<ForceMessage> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Positive vertical force of one foot at `phase` ∈ [0, 1) of its stride.
/// Double-hump stance shape: loading peak, mid-stance dip, push-off peak.
pub fn synthetic_grf(phase: f64, stance_fraction: f64, peak_n: f64) -> f64 {
    if !(0.0..stance_fraction).contains(&phase) {
        return 0.0;
    }
    let s = phase / stance_fraction;
    let humps = 0.8 - 0.2 * (4.0 * PI * s).cos();
    (peak_n * (PI * s).sin() * humps).max(0.0)
}

pub struct SyntheticForcePlate {
    pub stride_period_s: f64,
    pub stance_fraction: f64,
    pub peak_grf_n: f64,
    pub rate_hz: f64,
    pub topics: [String; 2],
    pub noise_n: f64,
}

impl SyntheticForcePlate {
    pub fn from_config(cfg: &SimulationConfig, topic_left: &str, topic_right: &str) -> Self {
        Self {
            stride_period_s: cfg.stride_period_s,
            stance_fraction: cfg.stance_fraction,
            peak_grf_n: cfg.peak_grf_n,
            rate_hz: cfg.plate_hz,
            topics: [topic_left.to_string(), topic_right.to_string()],
            noise_n: 2.0,
        }
    }

    /// Published (negated, compression-negative) values for both plates at time `t`.
    /// The right foot runs half a stride behind the left one.
    pub fn sample(&self, t: f64) -> [f64; 2] {
        let phase = |offset: f64| (t / self.stride_period_s + offset).rem_euclid(1.0);
        [
            -synthetic_grf(phase(0.0), self.stance_fraction, self.peak_grf_n),
            -synthetic_grf(phase(0.5), self.stance_fraction, self.peak_grf_n),
        ]
    }

    /// Publishes both plates every period until `quit` is cleared or the channel closes.
    /// Returns the number of messages dropped because the channel was full.
    pub fn spawn(
        self,
        tx: Sender<ForceMessage>,
        events: Arc<Events>,
        clock: MonotonicClock,
    ) -> Result<JoinHandle<u64>, ExoError> {
        thread::Builder::new()
            .name("force-plate".into())
            .spawn(move || self.publish(tx, events, clock))
            .map_err(|source| ExoError::ThreadSpawn { name: "force-plate".into(), source })
    }

    fn publish(self, tx: Sender<ForceMessage>, events: Arc<Events>, clock: MonotonicClock) -> u64 {
        info!("[ForcePlate] publishing {:?} at {} Hz", self.topics, self.rate_hz);
        let mut sched = DeadlineScheduler::new(self.rate_hz);
        sched.restart(Instant::now());
        let mut dropped = 0u64;

        'outer: while events.running() {
            let t = clock.now_s();
            let values = self.sample(t);
            for (topic, value) in self.topics.iter().zip(values) {
                let noisy = if value < 0.0 && self.noise_n > 0.0 {
                    value + random_range(-self.noise_n..self.noise_n)
                } else {
                    value
                };
                let msg = ForceMessage { topic: topic.clone(), value: format!("{noisy:.3}"), stamp: t };
                match tx.try_send(msg) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => dropped += 1,
                    Err(TrySendError::Disconnected(_)) => break 'outer,
                }
            }
            sched.wait_next();
        }
        debug!("[ForcePlate] stopped, dropped={}", dropped);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grf_is_zero_in_swing_and_positive_in_stance() {
        assert_eq!(synthetic_grf(0.7, 0.62, 700.0), 0.0);
        assert_eq!(synthetic_grf(0.0, 0.62, 700.0), 0.0);
        let mid_loading = synthetic_grf(0.1, 0.62, 700.0);
        assert!(mid_loading > 80.0 && mid_loading <= 700.0);
    }

    #[test]
    fn plates_are_compression_negative_and_out_of_phase() {
        let plate = SyntheticForcePlate::from_config(&SimulationConfig::default(), "left", "right");
        let [l, r] = plate.sample(0.2 * 1.2);
        assert!(l < -80.0);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn channel_subscriber_times_out_when_idle() {
        let (tx, mut sub) = ChannelSubscriber::pair(4);
        assert!(sub.get_message(Duration::from_millis(2)).is_none());
        tx.send(ForceMessage { topic: "left".into(), value: "-300.0".into(), stamp: 0.0 }).unwrap();
        assert_eq!(sub.get_message(Duration::from_millis(2)).map(|m| m.value), Some("-300.0".into()));
    }

    #[test]
    fn publisher_stops_on_quit() {
        let events = Events::new();
        events.arm();
        let (tx, mut sub) = ChannelSubscriber::pair(1024);
        let plate = SyntheticForcePlate::from_config(&SimulationConfig::default(), "left", "right");
        let handle = plate.spawn(tx, events.clone(), MonotonicClock::new()).unwrap();
        assert!(sub.get_message(Duration::from_millis(100)).is_some());
        events.quit.clear();
        handle.join().unwrap();
    }
}
