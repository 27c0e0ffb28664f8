//! recorder.rs
//! Snapshot logging path: loops push, a background writer drains.
//!
//! - Producers (`SnapshotSink::push`) never block: the ring drops its oldest entry when full
//! - One writer thread drains every sink into its own CSV file, batching flushes
//! - `SnapshotBoard` keeps the latest snapshot per thread for remote reads
//!
//! Sinks hold no reference back to their producers.

use std::{
    fs::{self, File},
    io::BufWriter,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use dashmap::DashMap;
use log::{debug, error, info};
use serde::Serialize;

use crate::error::ExoError;

const WRITER_POLL_MS: u64 = 5;
const BATCH: usize = 256;
const FLUSH_BATCHES: usize = 8;

/// Everything one actuator loop knows at a logged tick. Flat for CSV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ActuatorSnapshot {
    pub t_s: f64,
    pub loop_iter: u64,
    pub mode: &'static str,
    pub state_time_ms: u64,
    pub case_temp_c: f64,
    pub motor_current_ma: f64,
    pub motor_voltage_mv: f64,
    pub battery_voltage_mv: f64,
    pub battery_current_ma: f64,
    pub ankle_angle_deg: f64,
    pub motor_angle_deg: f64,
    pub ankle_velocity_dps: f64,
    pub motor_velocity_dps: f64,
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    pub gyro_x: f64,
    pub gyro_y: f64,
    pub gyro_z: f64,
    pub n: f64,
    pub hs_time: f64,
    pub t_in_stride: f64,
    pub stride_period: f64,
    pub in_swing: bool,
    pub peak_torque_nm: f64,
    pub torque_command_nm: f64,
    pub current_command_ma: i32,
    pub device_command_ma: i32,
    pub winding_temp_c: f64,
    pub act_ankle_torque_nm: f64,
    pub safety_shutoff: bool,
}

/// Latest per-side view of the gait estimator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GaitSnapshot {
    pub t_s: f64,
    pub left_force_n: f64,
    pub right_force_n: f64,
    pub left_in_swing: bool,
    pub right_in_swing: bool,
    pub left_stride_period: f64,
    pub right_stride_period: f64,
    pub left_stance_period: f64,
    pub right_stance_period: f64,
    pub left_hs_time: f64,
    pub right_hs_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    Actuator(ActuatorSnapshot),
    Gait(GaitSnapshot),
}

/// Bounded, drop-oldest ring one producer pushes into.
#[derive(Clone)]
pub struct SnapshotSink {
    name: String,
    ring: Arc<ArrayQueue<ActuatorSnapshot>>,
    dropped: Arc<AtomicU64>,
}

impl SnapshotSink {
    pub fn new(name: &str, capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            ring: Arc::new(ArrayQueue::new(capacity.max(1))),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Non-blocking. Returns true when an older snapshot was evicted.
    #[inline]
    pub fn push(&self, snap: ActuatorSnapshot) -> bool {
        let evicted = self.ring.force_push(snap).is_some();
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    pub fn pop(&self) -> Option<ActuatorSnapshot> {
        self.ring.pop()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Last snapshot per thread address, read by remote `ret_val` requests.
#[derive(Clone, Default)]
pub struct SnapshotBoard {
    latest: Arc<DashMap<String, Option<Snapshot>>>,
}

impl SnapshotBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `address` known before it has published anything.
    pub fn register(&self, address: &str) {
        self.latest.entry(address.to_string()).or_insert(None);
    }

    pub fn publish(&self, address: &str, snap: Snapshot) {
        match self.latest.get_mut(address) {
            Some(mut slot) => *slot = Some(snap),
            None => {
                self.latest.insert(address.to_string(), Some(snap));
            }
        }
    }

    /// `None` when the address was never registered; `Some(None)` before its first publish.
    pub fn get(&self, address: &str) -> Option<Option<Snapshot>> {
        self.latest.get(address).map(|s| *s)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.latest.iter().map(|e| e.key().clone()).collect()
    }
}

/// Background consumer draining sinks into CSV files.
pub struct SnapshotWriter {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl SnapshotWriter {
    /// Creates every output file up front so a bad path fails at startup.
    pub fn spawn(directory: PathBuf, outputs: Vec<(SnapshotSink, String)>) -> Result<Self, ExoError> {
        fs::create_dir_all(&directory)
            .map_err(|e| ExoError::Sink(format!("cannot create {directory:?}: {e}")))?;

        let mut writers = Vec::with_capacity(outputs.len());
        for (sink, file_name) in outputs {
            let path = directory.join(&file_name);
            let file = File::create(&path).map_err(|e| ExoError::Sink(format!("cannot create {path:?}: {e}")))?;
            info!("[Recorder] {} -> {:?}", sink.name(), path);
            writers.push((sink, Writer::from_writer(BufWriter::new(file))));
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("snapshot-writer".into())
            .spawn(move || consume(flag, writers))
            .map_err(|source| ExoError::ThreadSpawn { name: "snapshot-writer".into(), source })?;

        Ok(Self { running, handle: Some(handle) })
    }

    /// Stops the consumer after a final drain. Returns rows written.
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        self.running.store(false, Ordering::SeqCst);
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(rows)) => rows,
            Some(Err(_)) => {
                error!("[Recorder] writer thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn drain_batch(sink: &SnapshotSink, wtr: &mut Writer<BufWriter<File>>, limit: usize) -> usize {
    let mut n = 0;
    while n < limit {
        let Some(snap) = sink.pop() else { break };
        if let Err(e) = wtr.serialize(snap) {
            error!("[Recorder] {}: write failed: {}", sink.name(), e);
        }
        n += 1;
    }
    n
}

fn consume(running: Arc<AtomicBool>, mut writers: Vec<(SnapshotSink, Writer<BufWriter<File>>)>) -> u64 {
    let mut rows = 0u64;
    let mut flush_counter = 0usize;

    while running.load(Ordering::SeqCst) {
        let mut any = 0;
        for (sink, wtr) in writers.iter_mut() {
            any += drain_batch(sink, wtr, BATCH);
        }
        rows += any as u64;
        if any > 0 {
            flush_counter += 1;
            if flush_counter >= FLUSH_BATCHES {
                for (_, wtr) in writers.iter_mut() {
                    wtr.flush().ok();
                }
                flush_counter = 0;
            }
        } else {
            thread::sleep(Duration::from_millis(WRITER_POLL_MS));
        }
    }

    // final drain
    for (sink, wtr) in writers.iter_mut() {
        rows += drain_batch(sink, wtr, usize::MAX) as u64;
        if let Err(e) = wtr.flush() {
            error!("[Recorder] {}: flush failed: {}", sink.name(), e);
        }
        debug!("[Recorder] {} closed, dropped={}", sink.name(), sink.dropped());
    }
    rows
}
