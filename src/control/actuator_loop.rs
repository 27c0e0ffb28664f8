//! actuator_loop.rs
//! Hard real-time loop driving one ankle actuator.
//!
//! Per tick: drain inbox -> read device -> derive θ and N -> profile torque ->
//! torque to current -> vet -> thermal/current safety -> command -> decimated log.
//! `run` paces ticks against a monotonic deadline and exits when `quit` is cleared.
//!
//! The loop is the only owner of its device handle and of its actuator state.

use std::{mem, sync::Arc, time::Instant};

use log::{debug, error, info, warn};

use crate::{
    clock::MonotonicClock,
    comms::{
        message::{GaitEstimate, Message, MessageBody},
        router::Inbox,
    },
    config::{ControlConfig, ZeroingConfig},
    control::{
        current::CurrentConverter,
        profile::AssistanceProfile,
        thermal::{ThermalModel, ThermalTrip},
        transmission::TransmissionRatio,
        zeroing::{Zeros, zero_actuator},
    },
    device::{DeviceReading, ExoDevice, Gains},
    error::ExoError,
    events::Events,
    model::side::{Side, SideConfig},
    utils::{
        metrics::LoopCounters,
        recorder::{ActuatorSnapshot, Snapshot, SnapshotBoard, SnapshotSink},
        scheduler::{DeadlineScheduler, Release},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// `pause` cleared: bias current only.
    HoldBias,
    /// Profile-driven assistance.
    Active,
    /// A safety predicate fired; zero current until quit.
    Shutoff,
}

impl LoopMode {
    pub fn name(&self) -> &'static str {
        match self {
            LoopMode::HoldBias => "hold_bias",
            LoopMode::Active => "active",
            LoopMode::Shutoff => "shutoff",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SafetyTrip {
    CaseTemp(f64),
    WindingTemp(f64),
    CurrentSpike(f64),
}

/// What one tick decided.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub mode: LoopMode,
    pub n: f64,
    pub torque_command_nm: f64,
    /// Vetted command, always within [bias, max] in magnitude.
    pub current_command_ma: i32,
    /// What was actually sent to the device.
    pub device_command_ma: i32,
    pub stale_read: bool,
    pub safety_shutoff: bool,
}

pub struct ActuatorLoop {
    side: SideConfig,
    device: Box<dyn ExoDevice>,
    transmission: Arc<TransmissionRatio>,
    profile: Arc<AssistanceProfile>,
    thermal: ThermalModel,
    converter: CurrentConverter,
    inbox: Inbox,
    events: Arc<Events>,
    clock: MonotonicClock,
    loop_hz: f64,
    current_antispike_ma: f64,
    sink: Option<SnapshotSink>,
    board: Option<SnapshotBoard>,
    log_every: u64,

    estimate: GaitEstimate,
    peak_torque: f64,
    pending_peak: Option<f64>,
    reading: DeviceReading,
    have_reading: bool,
    zeros: Zeros,
    safety_shutoff: bool,
    trip: Option<SafetyTrip>,
    mode: LoopMode,
    last_device_command: i32,
    iter: u64,
    counters: LoopCounters,
    msg_buf: Vec<Message>,
    closed: bool,
}

impl ActuatorLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: Box<dyn ExoDevice>,
        side: SideConfig,
        transmission: Arc<TransmissionRatio>,
        profile: Arc<AssistanceProfile>,
        thermal: ThermalModel,
        inbox: Inbox,
        events: Arc<Events>,
        clock: MonotonicClock,
        cfg: &ControlConfig,
        initial_peak_torque: f64,
        initial_stride_period: f64,
    ) -> Self {
        let log_every = (cfg.loop_hz / cfg.log_hz).round().max(1.0) as u64;
        Self {
            side,
            device,
            transmission,
            profile,
            thermal,
            converter: CurrentConverter::new(cfg, side.motor_sign),
            msg_buf: Vec::with_capacity(inbox.capacity()),
            inbox,
            events,
            clock,
            loop_hz: cfg.loop_hz,
            current_antispike_ma: cfg.current_antispike_ma,
            sink: None,
            board: None,
            log_every,
            estimate: GaitEstimate::initial(initial_stride_period),
            peak_torque: initial_peak_torque,
            pending_peak: None,
            reading: DeviceReading::default(),
            have_reading: false,
            zeros: Zeros::default(),
            safety_shutoff: false,
            trip: None,
            mode: LoopMode::HoldBias,
            last_device_command: 0,
            iter: 0,
            counters: LoopCounters::default(),
            closed: false,
        }
    }

    /// Attaches the snapshot ring (written when `log` is set) and the remote board.
    pub fn with_logging(mut self, sink: Option<SnapshotSink>, board: Option<SnapshotBoard>) -> Self {
        if let Some(b) = &board {
            b.register(self.side.side.address());
        }
        self.sink = sink;
        self.board = board;
        self
    }

    /// Sends the current-loop gains and starts telemetry at the loop rate.
    pub fn prepare(&mut self, gains: Gains) -> Result<(), ExoError> {
        self.device.set_gains(gains)?;
        self.device.start_streaming(self.loop_hz.round() as u32)?;
        Ok(())
    }

    pub fn zero(&mut self, cfg: &ZeroingConfig) -> Result<Zeros, ExoError> {
        let zeros = zero_actuator(self.device.as_mut(), self.side, cfg, self.loop_hz)?;
        self.zeros = zeros;
        Ok(zeros)
    }

    pub fn side(&self) -> Side {
        self.side.side
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    pub fn estimate(&self) -> GaitEstimate {
        self.estimate
    }

    pub fn peak_torque(&self) -> f64 {
        self.peak_torque
    }

    pub fn pending_peak(&self) -> Option<f64> {
        self.pending_peak
    }

    pub fn safety_shutoff(&self) -> bool {
        self.safety_shutoff
    }

    pub fn trip(&self) -> Option<SafetyTrip> {
        self.trip
    }

    pub fn counters(&self) -> &LoopCounters {
        &self.counters
    }

    pub fn thermal(&self) -> &ThermalModel {
        &self.thermal
    }

    pub fn zeros(&self) -> Zeros {
        self.zeros
    }

    // ========================================================================
    // Step 1: inbox
    // ========================================================================

    fn stage_peak(&mut self, torque_nm: f64) {
        self.pending_peak = Some(torque_nm);
        if !self.estimate.in_swing {
            self.counters.deferred_torque_updates += 1;
        }
    }

    fn apply_message(&mut self, msg: Message) {
        self.counters.messages_applied += 1;
        match msg.body {
            MessageBody::GaitEstimate(est) => {
                self.estimate = est;
                if let Some(p) = est.peak_torque {
                    self.stage_peak(p);
                }
            }
            MessageBody::PeakTorque(p) if p.side == self.side.side => self.stage_peak(p.torque_nm),
            MessageBody::PeakTorque(p) => {
                warn!("[ActuatorLoop:{}] ignoring peak torque addressed to {}", self.side.side, p.side);
            }
            MessageBody::Event(ev) => {
                debug!("[ActuatorLoop:{}] {} -> {} (from {})", self.side.side, ev.kind.name(), ev.value, msg.sender);
            }
        }
    }

    fn drain_inbox(&mut self) {
        let mut msgs = mem::take(&mut self.msg_buf);
        self.inbox.drain_into(&mut msgs);
        for msg in msgs.drain(..) {
            self.apply_message(msg);
        }
        self.msg_buf = msgs;

        // peak torque only changes while the foot is off the ground
        if self.estimate.in_swing {
            if let Some(p) = self.pending_peak.take() {
                debug!("[ActuatorLoop:{}] peak torque {:.1} -> {:.1} Nm", self.side.side, self.peak_torque, p);
                self.peak_torque = p;
                self.counters.applied_torque_updates += 1;
            }
        }
    }

    // ========================================================================
    // Step 2: device read
    // ========================================================================

    fn read_device(&mut self) -> bool {
        match self.device.read() {
            Ok(Some(r)) => {
                self.reading = r;
                self.have_reading = true;
                false
            }
            Ok(None) => {
                self.counters.stale_reads += 1;
                true
            }
            Err(e) => {
                if self.counters.device_errors == 0 {
                    warn!("[ActuatorLoop:{}] device read failed: {}", self.side.side, e);
                }
                self.counters.device_errors += 1;
                self.counters.stale_reads += 1;
                true
            }
        }
    }

    // ========================================================================
    // Step 7: safety
    // ========================================================================

    fn check_safety(&mut self) {
        if self.safety_shutoff {
            return;
        }
        let raw_case = if self.have_reading { self.reading.temperature_c } else { f64::NAN };
        let trip = match self.thermal.check(raw_case) {
            Some(ThermalTrip::Case(t)) => Some(SafetyTrip::CaseTemp(t)),
            Some(ThermalTrip::Winding(t)) => Some(SafetyTrip::WindingTemp(t)),
            None if self.have_reading && self.reading.mot_cur_ma.abs() > self.current_antispike_ma => {
                Some(SafetyTrip::CurrentSpike(self.reading.mot_cur_ma))
            }
            None => None,
        };

        if let Some(t) = trip {
            error!("[ActuatorLoop:{}] safety trip {:?}: commanding 0 mA until quit", self.side.side, t);
            self.safety_shutoff = true;
            self.trip = Some(t);
            self.counters.safety_trips += 1;
        }
    }

    /// One control iteration at monotonic time `now_s`, `dt_s` after the previous one.
    pub fn step(&mut self, now_s: f64, dt_s: f64) -> TickReport {
        self.iter += 1;
        self.counters.ticks += 1;

        self.drain_inbox();
        let stale_read = self.read_device();

        // derive
        let theta = f64::from(self.side.ank_enc_sign) * self.reading.ank_ang_deg - self.transmission.get_offset();
        let n = self.transmission.get_n(theta);
        let stride_period = self.estimate.stride_period;
        let t_in_stride = now_s - self.estimate.hs_time;

        // profile
        let torque = match self.profile.torque(t_in_stride, stride_period, self.peak_torque, self.estimate.in_swing) {
            Ok(sp) => {
                if sp.clamped {
                    self.counters.negative_torque_clamps += 1;
                }
                sp.torque_nm
            }
            Err(_) => {
                self.counters.profile_errors += 1;
                self.profile.holding_torque()
            }
        };

        // convert and vet
        let raw_current = self.converter.torque_to_current(torque, n);
        let (current_command, clamped) = self.converter.vet(raw_current);
        if clamped {
            self.counters.current_clamps += 1;
        }

        // thermal + safety; the winding heated over dt with what the device was last sent
        if self.have_reading && !stale_read {
            self.thermal.set_case_temp(self.reading.temperature_c);
        }
        self.thermal.update(dt_s, f64::from(self.last_device_command.saturating_abs()));
        self.check_safety();

        // command
        self.mode = if self.safety_shutoff {
            LoopMode::Shutoff
        } else if !self.events.pause.is_set() {
            LoopMode::HoldBias
        } else {
            LoopMode::Active
        };
        let device_command = match self.mode {
            LoopMode::Shutoff => 0,
            LoopMode::HoldBias => self.converter.bias_command(),
            LoopMode::Active => current_command,
        };
        match self.device.command_motor_current(device_command) {
            Ok(()) => self.last_device_command = device_command,
            Err(e) => {
                if self.counters.device_errors == 0 {
                    warn!("[ActuatorLoop:{}] command failed: {}", self.side.side, e);
                }
                self.counters.device_errors += 1;
            }
        }

        // log
        if self.iter % self.log_every == 0 {
            self.log_snapshot(now_s, theta, n, t_in_stride, torque, current_command, device_command);
        }

        TickReport {
            mode: self.mode,
            n,
            torque_command_nm: torque,
            current_command_ma: current_command,
            device_command_ma: device_command,
            stale_read,
            safety_shutoff: self.safety_shutoff,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn log_snapshot(
        &mut self,
        now_s: f64,
        theta: f64,
        n: f64,
        t_in_stride: f64,
        torque: f64,
        current_command: i32,
        device_command: i32,
    ) {
        let r = &self.reading;
        let snap = ActuatorSnapshot {
            t_s: now_s,
            loop_iter: self.iter,
            mode: self.mode.name(),
            state_time_ms: r.state_time_ms,
            case_temp_c: r.temperature_c,
            motor_current_ma: r.mot_cur_ma,
            motor_voltage_mv: r.mot_volt_mv,
            battery_voltage_mv: r.batt_volt_mv,
            battery_current_ma: r.batt_curr_ma,
            ankle_angle_deg: theta,
            motor_angle_deg: r.mot_ang_deg - self.zeros.motor_deg,
            ankle_velocity_dps: r.ank_vel_dps,
            motor_velocity_dps: r.mot_vel_dps,
            accel_x: r.accel[0],
            accel_y: r.accel[1],
            accel_z: r.accel[2],
            gyro_x: r.gyro[0],
            gyro_y: r.gyro[1],
            gyro_z: r.gyro[2],
            n,
            hs_time: self.estimate.hs_time,
            t_in_stride,
            stride_period: self.estimate.stride_period,
            in_swing: self.estimate.in_swing,
            peak_torque_nm: self.peak_torque,
            torque_command_nm: torque,
            current_command_ma: current_command,
            device_command_ma: device_command,
            winding_temp_c: self.thermal.t_w(),
            act_ankle_torque_nm: self.converter.ankle_torque(r.mot_cur_ma, n),
            safety_shutoff: self.safety_shutoff,
        };

        if let Some(board) = &self.board {
            board.publish(self.side.side.address(), Snapshot::Actuator(snap));
        }
        if self.events.log.is_set() {
            if let Some(sink) = &self.sink {
                if sink.push(snap) {
                    self.counters.snapshots_dropped += 1;
                }
            }
        }
    }

    /// Paced loop. Returns itself so the caller can finish the shutdown.
    pub fn run(mut self) -> Self {
        let side = self.side.side;
        info!("[ActuatorLoop:{}] running at {} Hz", side, self.loop_hz);

        let mut sched = DeadlineScheduler::new(self.loop_hz);
        let period_s = sched.period().as_secs_f64();
        sched.restart(Instant::now());
        let mut last = self.clock.now_s() - period_s;

        while self.events.running() {
            let tick_start = Instant::now();
            let now = self.clock.now_s();
            self.step(now, now - last);
            last = now;
            self.counters.exec.record(tick_start.elapsed().as_micros() as u64);

            if let Release::Overrun { skipped, .. } = sched.wait_next() {
                self.counters.overruns += 1;
                self.counters.skipped_releases += skipped;
            }
        }

        self.counters.inbox_drops = self.inbox.dropped();
        info!(
            "[ActuatorLoop:{}] exit after {} ticks, overruns={} stale={} mode={}",
            side,
            self.counters.ticks,
            self.counters.overruns,
            self.counters.stale_reads,
            self.mode.name()
        );
        self
    }

    /// Commands 0 mA, stops and closes the device. Pending messages are dropped.
    pub fn shutdown(mut self) -> LoopCounters {
        self.close_device();
        self.counters
    }

    fn close_device(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let side = self.side.side;
        let pending = self.inbox.drain().len();
        if pending > 0 {
            debug!("[ActuatorLoop:{}] dropping {} pending messages", side, pending);
        }
        if let Err(e) = self.device.command_motor_current(0) {
            warn!("[ActuatorLoop:{}] final zero command failed: {}", side, e);
        }
        if let Err(e) = self.device.stop_motor() {
            warn!("[ActuatorLoop:{}] stop failed: {}", side, e);
        }
        if let Err(e) = self.device.close() {
            warn!("[ActuatorLoop:{}] close failed: {}", side, e);
        }
        self.counters.inbox_drops = self.inbox.dropped();
        info!("[ActuatorLoop:{}] device {} closed", side, self.device.id());
    }
}

/// A loop dropped without `shutdown` (failed startup, panic) still leaves the motor unpowered.
impl Drop for ActuatorLoop {
    fn drop(&mut self) {
        self.close_device();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::message::PeakTorqueMsg;
    use crate::config::{ProfileConfig, ThermalConfig, TransmissionConfig};
    use crate::device::{DeviceDriver, sim::{SimDriver, SimHandle}};
    use crate::model::calibration::CalibrationRecord;

    const DT: f64 = 0.001;

    fn left() -> SideConfig {
        SideConfig { side: Side::Left, motor_sign: -1, ank_enc_sign: 1 }
    }

    /// Constant N = 20 across the whole range.
    fn flat_transmission() -> Arc<TransmissionRatio> {
        let cal = CalibrationRecord::from_motor_curve(vec![20.0, 0.0], 0.0).unwrap();
        Arc::new(TransmissionRatio::new(&cal, &TransmissionConfig::default()))
    }

    fn build(stride_period: f64) -> (ActuatorLoop, SimHandle, Inbox, Arc<Events>) {
        let driver = SimDriver::new();
        let handle = driver.attach("sim:left", 0xC0CA);
        let device = driver.open("sim:left", 230_400).unwrap();
        let inbox = Inbox::default();
        let events = Events::new();
        events.arm();
        let lp = ActuatorLoop::new(
            device,
            left(),
            flat_transmission(),
            Arc::new(AssistanceProfile::new(&ProfileConfig::default()).unwrap()),
            ThermalModel::new(&ThermalConfig::default()),
            inbox.clone(),
            events.clone(),
            MonotonicClock::new(),
            &ControlConfig::default(),
            0.0,
            stride_period,
        );
        (lp, handle, inbox, events)
    }

    fn stance(hs_time: f64) -> MessageBody {
        MessageBody::GaitEstimate(GaitEstimate { hs_time, stride_period: 1.0, in_swing: false, peak_torque: None })
    }

    fn swing(hs_time: f64) -> MessageBody {
        MessageBody::GaitEstimate(GaitEstimate { hs_time, stride_period: 1.0, in_swing: true, peak_torque: None })
    }

    fn peak(torque_nm: f64) -> MessageBody {
        MessageBody::PeakTorque(PeakTorqueMsg { side: Side::Left, torque_nm })
    }

    #[test]
    fn paused_loop_holds_bias() {
        let (mut lp, handle, _inbox, _events) = build(1.0);
        let report = lp.step(0.0, DT);
        assert_eq!(report.mode, LoopMode::HoldBias);
        assert_eq!(report.device_command_ma, -500);
        assert_eq!(handle.last_command(), Some(-500));
    }

    #[test]
    fn winding_model_sees_only_applied_current() {
        let (mut lp, _handle, inbox, events) = build(1.0);
        inbox.push(Message::new("remote", peak(50.0)));
        lp.step(0.0, DT);
        inbox.push(Message::new("gait", stance(0.0)));

        let mut report = lp.step(0.54, DT);
        for _ in 0..2000 {
            report = lp.step(0.54, DT);
        }
        assert_eq!(report.mode, LoopMode::HoldBias);
        assert!(report.current_command_ma.abs() > 15_000, "{}", report.current_command_ma);
        let paused_rise = lp.thermal().t_w() - lp.thermal().t_c();
        assert!(paused_rise < 0.5, "{paused_rise}");

        events.pause.set();
        for _ in 0..2000 {
            lp.step(0.54, DT);
        }
        assert!(lp.thermal().t_w() - lp.thermal().t_c() > 5.0);
    }

    #[test]
    fn peak_torque_waits_for_swing() {
        let (mut lp, _handle, inbox, events) = build(1.0);
        events.pause.set();
        inbox.push(Message::new("gse", stance(0.0)));
        inbox.push(Message::new("remote", peak(30.0)));
        lp.step(0.1, DT);
        assert_eq!(lp.peak_torque(), 0.0);
        assert_eq!(lp.pending_peak(), Some(30.0));

        // a second update during stance replaces the pending one
        inbox.push(Message::new("remote", peak(25.0)));
        lp.step(0.2, DT);
        assert_eq!(lp.pending_peak(), Some(25.0));
        assert_eq!(lp.counters().deferred_torque_updates, 2);

        inbox.push(Message::new("gse", swing(0.0)));
        lp.step(0.7, DT);
        assert_eq!(lp.peak_torque(), 25.0);
        assert_eq!(lp.pending_peak(), None);
        assert_eq!(lp.counters().applied_torque_updates, 1);
    }

    #[test]
    fn torque_coupled_to_gait_applies_in_swing() {
        let (mut lp, _handle, inbox, _events) = build(1.0);
        let est = GaitEstimate { hs_time: 0.0, stride_period: 1.0, in_swing: true, peak_torque: Some(12.0) };
        inbox.push(Message::new("gse", MessageBody::GaitEstimate(est)));
        lp.step(0.8, DT);
        assert_eq!(lp.peak_torque(), 12.0);
    }

    #[test]
    fn vetted_current_stays_within_bounds() {
        let (mut lp, _handle, inbox, events) = build(1.0);
        events.pause.set();
        inbox.push(Message::new("remote", peak(400.0)));
        lp.step(0.0, DT);
        inbox.push(Message::new("gse", stance(0.0)));

        let mut saw_max = false;
        for k in 1..1000 {
            let report = lp.step(k as f64 * DT, DT);
            let mag = report.current_command_ma.abs();
            assert!((500..=20_000).contains(&mag), "tick {k}: {mag} mA");
            assert!(report.current_command_ma <= 0, "left motor sign is negative");
            saw_max |= mag == 20_000;
        }
        assert!(saw_max);
        assert!(lp.counters().current_clamps > 0);
    }

    #[test]
    fn hot_case_reading_latches_shutoff() {
        let (mut lp, handle, _inbox, events) = build(1.0);
        events.pause.set();
        lp.step(0.0, DT);
        assert!(!lp.safety_shutoff());

        handle.inject_case_temp_once(80.0);
        let report = lp.step(DT, DT);
        assert!(report.safety_shutoff);
        assert_eq!(report.device_command_ma, 0);
        assert_eq!(lp.trip(), Some(SafetyTrip::CaseTemp(80.0)));

        // stays off with a cool case and assistance enabled
        for k in 2..50 {
            let report = lp.step(k as f64 * DT, DT);
            assert_eq!(report.mode, LoopMode::Shutoff);
            assert_eq!(report.device_command_ma, 0);
        }
        assert_eq!(lp.counters().safety_trips, 1);
    }

    #[test]
    fn current_spike_trips() {
        let (mut lp, handle, _inbox, _events) = build(1.0);
        handle.inject_current_once(45_000.0);
        let report = lp.step(0.0, DT);
        assert!(report.safety_shutoff);
        assert_eq!(lp.trip(), Some(SafetyTrip::CurrentSpike(45_000.0)));
    }

    #[test]
    fn stale_read_keeps_previous_reading() {
        let (mut lp, handle, _inbox, _events) = build(1.0);
        lp.step(0.0, DT);
        handle.inject_stale_reads(3);
        for k in 1..=3 {
            assert!(lp.step(k as f64 * DT, DT).stale_read);
        }
        assert!(!lp.step(4.0 * DT, DT).stale_read);
        assert_eq!(lp.counters().stale_reads, 3);
        assert!(!lp.safety_shutoff());
    }

    #[test]
    fn log_event_gates_the_sink_but_not_the_board() {
        let (lp, _handle, _inbox, events) = build(1.0);
        let sink = SnapshotSink::new("exo_left", 128);
        let board = SnapshotBoard::new();
        let mut lp = lp.with_logging(Some(sink.clone()), Some(board.clone()));

        for k in 0..20 {
            lp.step(k as f64 * DT, DT);
        }
        assert!(sink.is_empty());
        assert!(matches!(board.get("exo_left"), Some(Some(Snapshot::Actuator(_)))));

        events.log.set();
        for k in 20..40 {
            lp.step(k as f64 * DT, DT);
        }
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn run_exits_on_quit_and_shutdown_zeroes_the_motor() {
        let (lp, handle, _inbox, events) = build(1.0);
        let quitter = {
            let events = events.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(50));
                events.quit.clear();
            })
        };
        let lp = lp.run();
        quitter.join().unwrap();
        assert!(lp.counters().ticks > 10);

        let counters = lp.shutdown();
        assert!(counters.ticks > 10);
        assert_eq!(handle.last_command(), Some(0));
        assert!(handle.is_stopped());
        assert!(handle.is_closed());
    }

    #[test]
    fn dropped_loop_closes_its_device() {
        let (mut lp, handle, _inbox, _events) = build(1.0);
        lp.prepare(Gains::default()).unwrap();
        assert_eq!(handle.streaming_hz(), Some(1000));
        assert_eq!(handle.gains(), Some(Gains::default()));
        lp.step(0.0, DT);
        drop(lp);
        assert_eq!(handle.last_command(), Some(0));
        assert!(handle.is_closed());
    }
}
