//! supervisor.rs
//! Builds the controller, runs it, and tears it down in order.
//!
//! Build order: profile, then calibration and thermal model per side, the gait
//! estimator, the devices and actuator loops, and last the remote service. Any failure
//! aborts before a thread starts; devices opened so far are commanded to 0 mA and
//! closed.
//!
//! Shutdown order: clear `quit`, join left and right loops, the estimator, then the
//! remote service; only then are the devices zeroed and closed and the logs flushed.

use std::{
    net::SocketAddr,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::Sender;
use log::{error, info, warn};
use serde::Serialize;
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::{
    clock::MonotonicClock,
    comms::{
        remote::{RemoteControl, RemoteServer, SubjectInfo, TorqueRoute},
        router::{Inbox, MessageRouter},
    },
    config::ExoConfig,
    control::{
        actuator_loop::{ActuatorLoop, LoopMode, SafetyTrip},
        profile::AssistanceProfile,
        thermal::ThermalModel,
        transmission::TransmissionRatio,
    },
    device::{DeviceDriver, ExoDevice},
    error::{ConfigError, ExoError},
    events::Events,
    gait::{
        estimator::{GAIT_ADDRESS, GaitStateEstimator},
        force_plate::{ForceMessage, ForcePlateSubscriber, SyntheticForcePlate},
    },
    model::{
        calibration::find_latest,
        side::{DeviceEntry, DeviceMap, Side},
    },
    utils::{
        metrics::{EstimatorCounters, LoopCounters, RemoteCounters},
        recorder::{SnapshotBoard, SnapshotSink, SnapshotWriter},
    },
};

const WAIT_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SideSummary {
    pub side: Side,
    pub final_mode: &'static str,
    #[serde(skip)]
    pub trip: Option<SafetyTrip>,
    pub counters: LoopCounters,
}

impl SideSummary {
    pub fn ended_in(&self, mode: LoopMode) -> bool {
        self.final_mode == mode.name()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub sides: Vec<SideSummary>,
    pub estimator: Option<EstimatorCounters>,
    pub remote: Option<RemoteCounters>,
    pub rows_logged: u64,
    pub plate_drops: u64,
}

impl RunSummary {
    pub fn side(&self, side: Side) -> Option<&SideSummary> {
        self.sides.iter().find(|s| s.side == side)
    }

    pub fn safety_tripped(&self) -> bool {
        self.sides.iter().any(|s| s.trip.is_some())
    }

    pub fn log(&self) {
        for s in &self.sides {
            let c = &s.counters;
            info!(
                "[Summary:{}] mode={} ticks={} overruns={} ({:.2}%) stale={} clamps={} trips={:?} exec mean={:.1}us max={}us",
                s.side,
                s.final_mode,
                c.ticks,
                c.overruns,
                c.overrun_ratio() * 100.0,
                c.stale_reads,
                c.current_clamps,
                s.trip,
                c.exec.mean_us().unwrap_or(0.0),
                c.exec.max_us
            );
        }
        if let Some(e) = &self.estimator {
            info!(
                "[Summary:gait] samples={} hs={} to={} rejected={} timeouts={}",
                e.samples, e.heel_strikes, e.toe_offs, e.rejected_strides, e.timeouts
            );
        }
        info!("[Summary] rows logged={} plate drops={}", self.rows_logged, self.plate_drops);
    }
}

pub struct Supervisor {
    config: ExoConfig,
    subject: SubjectInfo,
    events: Arc<Events>,
    router: Arc<MessageRouter>,
    board: SnapshotBoard,
    clock: MonotonicClock,
    loops: Vec<ActuatorLoop>,
    sinks: Vec<(SnapshotSink, String)>,
    estimator: GaitStateEstimator,
    control: RemoteControl,
    server: Option<RemoteServer>,
    plate: Option<(SyntheticForcePlate, Sender<ForceMessage>)>,
}

/// Closes a device that will not make it into a loop.
fn reject(mut device: Box<dyn ExoDevice>, err: ExoError) -> ExoError {
    if let Err(e) = device.close() {
        warn!("[Supervisor] closing device {} after failed startup: {}", device.id(), e);
    }
    err
}

impl Supervisor {
    /// Loads this side's calibration and tabulates N(θ).
    fn transmission_for(config: &ExoConfig, side: Side) -> Result<TransmissionRatio, ExoError> {
        let path = match config.calibration.override_for(side) {
            Some(p) => p.to_path_buf(),
            None => find_latest(&config.calibration.directory, &config.calibration.prefix, side)?,
        };
        info!("[Supervisor] {} calibration {:?}", side, path);
        Ok(TransmissionRatio::from_file(&path, &config.transmission)?)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_loop(
        config: &ExoConfig,
        entry: &DeviceEntry,
        device_map: &DeviceMap,
        driver: &dyn DeviceDriver,
        profile: &Arc<AssistanceProfile>,
        (transmission, thermal): (Arc<TransmissionRatio>, ThermalModel),
        inbox: Inbox,
        events: &Arc<Events>,
        clock: MonotonicClock,
    ) -> Result<ActuatorLoop, ExoError> {
        let device = driver.open(&entry.port, config.control.baud)?;
        let side = match device_map.lookup(device.id()) {
            Ok(side) => side,
            Err(e) => return Err(reject(device, e)),
        };
        if side.side != entry.side {
            let msg = format!("port {} is configured {} but device {} maps to {}", entry.port, entry.side, device.id(), side.side);
            return Err(reject(device, ConfigError::Invalid(msg).into()));
        }
        info!("[Supervisor] {} boot id={} on {}", side.side, device.id(), entry.port);

        // from here on the loop owns the device and closes it if dropped
        let mut lp = ActuatorLoop::new(
            device,
            side,
            transmission,
            profile.clone(),
            thermal,
            inbox,
            events.clone(),
            clock,
            &config.control,
            config.profile.initial_peak_torque_nm,
            config.gait.initial_stride_period_s,
        );
        lp.prepare(config.control.gains)?;
        lp.zero(&config.zeroing)?;
        Ok(lp)
    }

    pub fn build(
        config: ExoConfig,
        subject: SubjectInfo,
        driver: &dyn DeviceDriver,
        subscriber: Box<dyn ForcePlateSubscriber>,
    ) -> Result<Self, ExoError> {
        config.validate()?;
        let device_map = config.device_map()?;
        let clock = MonotonicClock::new();
        let events = Events::new();
        let router = Arc::new(MessageRouter::new());
        let board = SnapshotBoard::new();
        let profile = Arc::new(AssistanceProfile::new(&config.profile)?);

        let mut models = Vec::with_capacity(2);
        for side in Side::BOTH {
            let Some(entry) = device_map.entries().iter().find(|e| e.side == side) else {
                return Err(ConfigError::Invalid(format!("no device configured for {side}")).into());
            };
            let transmission = Arc::new(Self::transmission_for(&config, side)?);
            models.push((entry, (transmission, ThermalModel::new(&config.thermal))));
        }

        let mut estimator = GaitStateEstimator::new(subscriber, router.clone(), events.clone(), clock, &config.gait)
            .with_board(board.clone());
        let route = if config.remote.couple_torque_to_gait {
            let inbox = Inbox::default();
            router.register(GAIT_ADDRESS, inbox.clone())?;
            estimator = estimator.with_coupling(inbox);
            TorqueRoute::ViaGait
        } else {
            TorqueRoute::Direct
        };

        let mut loops = Vec::with_capacity(2);
        let mut sinks = Vec::with_capacity(2);
        for (entry, model) in models {
            let side = entry.side;
            let inbox = Inbox::default();
            router.register(side.address(), inbox.clone())?;

            let lp = Self::build_loop(&config, entry, &device_map, driver, &profile, model, inbox, &events, clock)?;
            let sink = SnapshotSink::new(side.address(), config.logging.ring_capacity);
            let file = format!("{}_{}_{}.csv", subject.subject_id, subject.trial_type, side.name());
            sinks.push((sink.clone(), file));
            loops.push(lp.with_logging(Some(sink), Some(board.clone())));
        }

        let control = RemoteControl::new(router.clone(), events.clone(), board.clone(), subject.clone(), route);
        let server = if config.remote.enabled {
            Some(RemoteServer::bind(&config.remote.bind, control.clone(), events.clone(), config.remote.poll_ms)?)
        } else {
            None
        };

        info!("[Supervisor] built: {:?}", router.addresses());
        Ok(Self {
            config,
            subject,
            events,
            router,
            board,
            clock,
            loops,
            sinks,
            estimator,
            control,
            server,
            plate: None,
        })
    }

    /// Publishes synthetic force-plate data for the duration of the run.
    pub fn with_synthetic_plate(mut self, plate: SyntheticForcePlate, tx: Sender<ForceMessage>) -> Self {
        self.plate = Some((plate, tx));
        self
    }

    pub fn events(&self) -> Arc<Events> {
        self.events.clone()
    }

    pub fn router(&self) -> Arc<MessageRouter> {
        self.router.clone()
    }

    pub fn board(&self) -> SnapshotBoard {
        self.board.clone()
    }

    pub fn remote_control(&self) -> RemoteControl {
        self.control.clone()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().and_then(RemoteServer::local_addr)
    }

    pub fn subject(&self) -> &SubjectInfo {
        &self.subject
    }

    fn spawn_loop(lp: ActuatorLoop, cpu_core: Option<usize>) -> Result<JoinHandle<ActuatorLoop>, ExoError> {
        let name = format!("exo-{}", lp.side());
        thread::Builder::new()
            .name(name.clone())
            .spawn_with_priority(ThreadPriority::Max, move |priority| {
                if let Err(e) = priority {
                    warn!("[{}] running without elevated priority: {:?}", lp.side(), e);
                }
                if let Some(core) = cpu_core {
                    let pinned = core_affinity::get_core_ids()
                        .unwrap_or_default()
                        .into_iter()
                        .find(|c| c.id == core)
                        .is_some_and(core_affinity::set_for_current);
                    if !pinned {
                        warn!("[{}] could not pin to core {}", lp.side(), core);
                    }
                }
                lp.run()
            })
            .map_err(|source| ExoError::ThreadSpawn { name, source })
    }

    /// Runs until `quit` is cleared or `duration` elapses, then shuts down in order.
    pub fn run(self, duration: Option<Duration>) -> Result<RunSummary, ExoError> {
        let Supervisor { config, events, clock, loops, sinks, estimator, server, plate, .. } = self;

        let writer = SnapshotWriter::spawn(config.logging.directory.clone(), sinks)?;
        events.arm();
        info!("[Supervisor] run armed (quit set, pause and log cleared)");

        let mut summary = RunSummary::default();
        let mut spawn_error: Option<ExoError> = None;

        let mut plate_handle = None;
        if let Some((plate, tx)) = plate {
            match plate.spawn(tx, events.clone(), clock) {
                Ok(h) => plate_handle = Some(h),
                Err(e) => spawn_error = Some(e),
            }
        }

        // loops left unspawned are dropped here, which powers their motors down
        let mut loop_handles = Vec::with_capacity(loops.len());
        for lp in loops {
            if spawn_error.is_some() {
                break;
            }
            match Self::spawn_loop(lp, config.control.cpu_core) {
                Ok(h) => loop_handles.push(h),
                Err(e) => spawn_error = Some(e),
            }
        }

        let mut estimator_handle = None;
        if spawn_error.is_none() {
            match thread::Builder::new().name("gait".into()).spawn(move || estimator.run()) {
                Ok(h) => estimator_handle = Some(h),
                Err(source) => spawn_error = Some(ExoError::ThreadSpawn { name: "gait".into(), source }),
            }
        }

        let mut remote_handle = None;
        if let Some(server) = server.filter(|_| spawn_error.is_none()) {
            match thread::Builder::new().name("remote".into()).spawn(move || server.run()) {
                Ok(h) => remote_handle = Some(h),
                Err(source) => spawn_error = Some(ExoError::ThreadSpawn { name: "remote".into(), source }),
            }
        }

        if spawn_error.is_none() {
            let started = Instant::now();
            while events.running() {
                if duration.is_some_and(|d| started.elapsed() >= d) {
                    info!("[Supervisor] run duration reached");
                    break;
                }
                thread::sleep(WAIT_POLL);
            }
        }
        events.quit.clear();

        let mut finished = Vec::with_capacity(loop_handles.len());
        for handle in loop_handles {
            match handle.join() {
                Ok(lp) => finished.push(lp),
                Err(_) => error!("[Supervisor] actuator thread panicked"),
            }
        }
        if let Some(h) = estimator_handle {
            match h.join() {
                Ok(c) => summary.estimator = Some(c),
                Err(_) => error!("[Supervisor] gait thread panicked"),
            }
        }
        if let Some(h) = remote_handle {
            match h.join() {
                Ok(c) => summary.remote = Some(c),
                Err(_) => error!("[Supervisor] remote thread panicked"),
            }
        }

        for lp in finished {
            let (side, mode, trip) = (lp.side(), lp.mode(), lp.trip());
            let counters = lp.shutdown();
            summary.sides.push(SideSummary { side, final_mode: mode.name(), trip, counters });
        }
        summary.rows_logged = writer.stop();
        if let Some(h) = plate_handle {
            summary.plate_drops = h.join().unwrap_or_default();
        }

        match spawn_error {
            Some(e) => Err(e),
            None => {
                summary.log();
                Ok(summary)
            }
        }
    }
}
