//! estimator.rs
//! Gait state from the two force plates.
//!
//! Per side: hysteretic stance detection (heel-strike above `hs_threshold_n` from
//! swing, toe-off below `to_threshold_n` from stance) and filtered stride/stance
//! periods. Every transition sends one `GaitEstimate` to that side's actuator loop.
//!
//! A missing sample never blocks: on timeout or an empty value the previous force
//! stands, which by construction cannot produce a transition.

use std::{mem, sync::Arc, time::Duration};

use log::{debug, info, warn};

use crate::{
    clock::MonotonicClock,
    comms::{
        message::{GaitEstimate, Message, MessageBody},
        router::{Inbox, MessageRouter},
    },
    config::GaitConfig,
    events::Events,
    gait::{
        filter::{FilterUpdate, PeriodFilter},
        force_plate::{ForceMessage, ForcePlateSubscriber},
    },
    model::side::Side,
    utils::{
        metrics::EstimatorCounters,
        recorder::{GaitSnapshot, Snapshot, SnapshotBoard},
    },
};

/// Router address of the estimator (sender of gait messages, receiver of coupled torques).
pub const GAIT_ADDRESS: &str = "gait";

const BOARD_EVERY: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaitEvent {
    HeelStrike,
    ToeOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub event: GaitEvent,
    /// Outcome of the period submitted at this transition, if one was measured.
    pub period: Option<FilterUpdate>,
}

#[derive(Debug, Clone)]
pub struct SideDetector {
    hs_threshold: f64,
    to_threshold: f64,
    in_stance: bool,
    hs_time: Option<f64>,
    stride: PeriodFilter,
    stance: PeriodFilter,
}

impl SideDetector {
    pub fn new(cfg: &GaitConfig) -> Self {
        let filter = |fallback| {
            PeriodFilter::new(cfg.filter_size, cfg.rejection_fraction, cfg.max_consecutive_rejections, fallback)
        };
        Self {
            hs_threshold: cfg.hs_threshold_n,
            to_threshold: cfg.to_threshold_n,
            in_stance: false,
            hs_time: None,
            stride: filter(cfg.initial_stride_period_s),
            stance: filter(0.0),
        }
    }

    pub fn update(&mut self, force_n: f64, now: f64) -> Option<Transition> {
        if !self.in_stance && force_n > self.hs_threshold {
            self.in_stance = true;
            let period = self.hs_time.map(|prev| self.stride.submit(now - prev));
            self.hs_time = Some(now);
            return Some(Transition { event: GaitEvent::HeelStrike, period });
        }
        if self.in_stance && force_n < self.to_threshold {
            self.in_stance = false;
            let period = self.hs_time.map(|hs| self.stance.submit(now - hs));
            return Some(Transition { event: GaitEvent::ToeOff, period });
        }
        None
    }

    pub fn in_swing(&self) -> bool {
        !self.in_stance
    }

    pub fn stride_period(&self) -> f64 {
        self.stride.average()
    }

    pub fn stance_period(&self) -> f64 {
        self.stance.average()
    }

    pub fn hs_time(&self) -> f64 {
        self.hs_time.unwrap_or(0.0)
    }

    pub fn estimate(&self) -> GaitEstimate {
        GaitEstimate {
            hs_time: self.hs_time(),
            stride_period: self.stride_period(),
            in_swing: self.in_swing(),
            peak_torque: None,
        }
    }
}

pub struct GaitStateEstimator {
    subscriber: Box<dyn ForcePlateSubscriber>,
    router: Arc<MessageRouter>,
    events: Arc<Events>,
    clock: MonotonicClock,
    topics: [String; 2],
    timeout: Duration,
    detectors: [SideDetector; 2],
    last_force: [f64; 2],
    coupling: Option<Inbox>,
    pending_peak: [Option<f64>; 2],
    board: Option<SnapshotBoard>,
    counters: EstimatorCounters,
    msg_buf: Vec<Message>,
}

impl GaitStateEstimator {
    pub fn new(
        subscriber: Box<dyn ForcePlateSubscriber>,
        router: Arc<MessageRouter>,
        events: Arc<Events>,
        clock: MonotonicClock,
        cfg: &GaitConfig,
    ) -> Self {
        Self {
            subscriber,
            router,
            events,
            clock,
            topics: [cfg.topic_left.clone(), cfg.topic_right.clone()],
            timeout: Duration::from_millis(cfg.recv_timeout_ms),
            detectors: [SideDetector::new(cfg), SideDetector::new(cfg)],
            last_force: [0.0; 2],
            coupling: None,
            pending_peak: [None; 2],
            board: None,
            counters: EstimatorCounters::default(),
            msg_buf: Vec::new(),
        }
    }

    /// Peak torques arriving in `inbox` ride along with the next estimate of their side.
    pub fn with_coupling(mut self, inbox: Inbox) -> Self {
        self.coupling = Some(inbox);
        self
    }

    pub fn with_board(mut self, board: SnapshotBoard) -> Self {
        board.register(GAIT_ADDRESS);
        self.board = Some(board);
        self
    }

    pub fn counters(&self) -> &EstimatorCounters {
        &self.counters
    }

    pub fn detector(&self, side: Side) -> &SideDetector {
        &self.detectors[side.index()]
    }

    pub fn last_force(&self, side: Side) -> f64 {
        self.last_force[side.index()]
    }

    /// Feeds one positive stance force. Returns the estimate to send if a transition fired.
    pub fn on_force(&mut self, side: Side, force_n: f64, now: f64) -> Option<GaitEstimate> {
        let i = side.index();
        self.last_force[i] = force_n;
        let tr = self.detectors[i].update(force_n, now)?;

        match tr.event {
            GaitEvent::HeelStrike => self.counters.heel_strikes += 1,
            GaitEvent::ToeOff => self.counters.toe_offs += 1,
        }
        match (tr.event, tr.period) {
            (GaitEvent::HeelStrike, Some(FilterUpdate::Rejected)) => self.counters.rejected_strides += 1,
            (GaitEvent::ToeOff, Some(FilterUpdate::Rejected)) => self.counters.rejected_stances += 1,
            (_, Some(FilterUpdate::Reset)) => self.counters.filter_resets += 1,
            _ => {}
        }

        let mut est = self.detectors[i].estimate();
        est.peak_torque = self.pending_peak[i].take();
        debug!(
            "[GaitStateEstimator] {} {:?} t={:.3} stride={:.3}",
            side, tr.event, now, est.stride_period
        );
        Some(est)
    }

    fn topic_side(&self, topic: &str) -> Option<Side> {
        Side::BOTH.into_iter().find(|s| self.topics[s.index()] == topic)
    }

    fn handle_sample(&mut self, msg: ForceMessage, now: f64) {
        let Some(side) = self.topic_side(&msg.topic) else {
            self.counters.unknown_topics += 1;
            return;
        };
        let i = side.index();
        let value = msg.value.trim();
        let force = if value.is_empty() {
            self.counters.empty_samples += 1;
            self.last_force[i]
        } else {
            match value.parse::<f64>() {
                // plates publish compression as negative
                Ok(v) if v.is_finite() => -v,
                _ => {
                    self.counters.parse_errors += 1;
                    self.last_force[i]
                }
            }
        };

        if let Some(est) = self.on_force(side, force, now) {
            self.send_estimate(side, est);
            self.publish_board(now);
        } else if self.counters.samples % BOARD_EVERY == 0 {
            self.publish_board(now);
        }
    }

    fn send_estimate(&mut self, side: Side, est: GaitEstimate) {
        if let Err(e) = self.router.send(GAIT_ADDRESS, side.address(), MessageBody::GaitEstimate(est)) {
            if self.counters.send_failures == 0 {
                warn!("[GaitStateEstimator] {}", e);
            }
            self.counters.send_failures += 1;
        }
    }

    fn publish_board(&self, now: f64) {
        let Some(board) = &self.board else { return };
        let [l, r] = &self.detectors;
        board.publish(
            GAIT_ADDRESS,
            Snapshot::Gait(GaitSnapshot {
                t_s: now,
                left_force_n: self.last_force[0],
                right_force_n: self.last_force[1],
                left_in_swing: l.in_swing(),
                right_in_swing: r.in_swing(),
                left_stride_period: l.stride_period(),
                right_stride_period: r.stride_period(),
                left_stance_period: l.stance_period(),
                right_stance_period: r.stance_period(),
                left_hs_time: l.hs_time(),
                right_hs_time: r.hs_time(),
            }),
        );
    }

    fn drain_coupling(&mut self) {
        let Some(inbox) = &self.coupling else { return };
        let mut msgs = mem::take(&mut self.msg_buf);
        inbox.drain_into(&mut msgs);
        for msg in msgs.drain(..) {
            if let MessageBody::PeakTorque(p) = msg.body {
                self.pending_peak[p.side.index()] = Some(p.torque_nm);
            }
        }
        self.msg_buf = msgs;
    }

    /// One receive with the configured timeout.
    pub fn poll_once(&mut self) {
        self.drain_coupling();
        match self.subscriber.get_message(self.timeout) {
            Some(msg) => {
                self.counters.samples += 1;
                let now = self.clock.now_s();
                self.handle_sample(msg, now);
            }
            None => self.counters.timeouts += 1,
        }
    }

    pub fn run(mut self) -> EstimatorCounters {
        info!("[GaitStateEstimator] running, topics {:?}, timeout {:?}", self.topics, self.timeout);
        while self.events.running() {
            self.poll_once();
        }
        let c = self.counters;
        info!(
            "[GaitStateEstimator] exit: samples={} hs={} to={} rejected strides={} timeouts={}",
            c.samples, c.heel_strikes, c.toe_offs, c.rejected_strides, c.timeouts
        );
        c
    }
}
