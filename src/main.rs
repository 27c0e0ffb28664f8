//! # Exoboot controller entry point
//!
//! ```bash
//! # bench run against two simulated boots and synthetic force plates
//! RUST_LOG=info exoboot S01 walk flat "1.25 m/s" false --duration-s 30
//!
//! # with a TOML configuration
//! exoboot S01 walk incline "" false --config exo.toml
//!
//! # operator commands while running
//! curl -d '{"method":"pause","value":true}' http://127.0.0.1:5556/rpc
//! curl -d '{"method":"torques","left":20,"right":20}' http://127.0.0.1:5556/rpc
//! ```
//!
//! Exit code 0 after a clean shutdown, 1 when the controller could not be built.

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{ArgAction, Parser};
use env_logger::Env;
use log::{error, info, warn};

use exoboot_controller::{
    comms::remote::SubjectInfo,
    config::ExoConfig,
    device::sim::{bench_driver, write_bench_calibration},
    error::{ConfigError, ExoError},
    gait::force_plate::{ChannelSubscriber, SyntheticForcePlate},
    supervisor::{RunSummary, Supervisor},
};

const PLATE_CHANNEL_CAPACITY: usize = 2048;

#[derive(Parser, Debug)]
#[command(name = "exoboot")]
#[command(version)]
#[command(about = "Bilateral ankle exoskeleton controller")]
struct Args {
    subject_id: String,

    trial_type: String,

    #[arg(default_value = "")]
    trial_condition: String,

    #[arg(default_value = "")]
    description: String,

    /// Whether the backup force stream is in use for this trial.
    #[arg(default_value_t = false, action = ArgAction::Set)]
    use_backup: bool,

    /// TOML configuration; built-in bench defaults when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for a remote quit.
    #[arg(long, value_name = "SECONDS")]
    duration_s: Option<f64>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args) {
        Ok(summary) => {
            if summary.safety_tripped() {
                warn!("run ended with a safety shutoff; see the summary above");
            }
            info!("=== EXOBOOT FINISHED ===");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("startup failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<RunSummary, ExoError> {
    let config = match &args.config {
        Some(path) => ExoConfig::load(path)?,
        None => ExoConfig::default(),
    };
    if !config.simulation.enabled {
        return Err(ConfigError::Invalid("no hardware driver is linked into this build; enable [simulation]".into()).into());
    }
    let duration = args
        .duration_s
        .or(config.run_duration_s)
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(Duration::from_secs_f64);
    let subject = SubjectInfo {
        subject_id: args.subject_id,
        trial_type: args.trial_type,
        trial_condition: args.trial_condition,
        description: args.description,
        use_backup: args.use_backup,
    };
    info!("=== EXOBOOT START === subject={} trial={}", subject.subject_id, subject.trial_type);

    write_bench_calibration(&config)?;
    let driver = bench_driver(&config);
    let (tx, subscriber) = ChannelSubscriber::pair(PLATE_CHANNEL_CAPACITY);
    let plate = SyntheticForcePlate::from_config(&config.simulation, &config.gait.topic_left, &config.gait.topic_right);

    let supervisor = Supervisor::build(config, subject, &driver, Box::new(subscriber))?.with_synthetic_plate(plate, tx);
    if let Some(addr) = supervisor.remote_addr() {
        info!("remote control at http://{}/rpc", addr);
    }

    let events = supervisor.events();
    if let Err(e) = ctrlc::set_handler(move || events.quit.clear()) {
        warn!("Ctrl-C handler not installed: {}", e);
    }

    supervisor.run(duration)
}
