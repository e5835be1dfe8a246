use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use rowmon::config::Config;
use rowmon::error::ConfigError;
use rowmon::gpio::PiGpioSource;
use rowmon::replay::CsvReplaySource;
use rowmon::status::WorkoutStatus;
use rowmon::traits::PulseSource;
use rowmon::workout::WorkoutTracker;

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "rowmon.json")]
    config: PathBuf,

    /// Replay a recorded raw-tick CSV instead of connecting to the sensor
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Pace replay samples (~16 ms apart) to simulate a live workout
    #[arg(long, default_value_t = false)]
    pace: bool,

    /// Skip writing the raw-pulse log on shutdown
    #[arg(long, default_value_t = false)]
    no_save: bool,
}

fn load_config(path: &Path) -> Result<Config> {
    match Config::load(path) {
        Ok(config) => {
            info!("loaded config from {}", path.display());
            Ok(config)
        }
        // No file yet: run on defaults, the way a fresh install does
        Err(ConfigError::Read { .. }) => {
            warn!("no config at {}, using defaults", path.display());
            Ok(Config::default())
        }
        Err(e) => Err(e).context("invalid configuration"),
    }
}

fn log_status(status: &Arc<RwLock<WorkoutStatus>>) {
    if let Ok(s) = status.read() {
        info!(
            "{:7.1} m | {:4.1} spm | {:.2} m/s | {} strokes",
            s.distance_m, s.strokes_per_minute, s.boat_speed_m_per_s, s.stroke_count
        );
    }
}

/// Run the tracker until shutdown is requested or the source runs dry.
fn run_workout<S: PulseSource>(
    source: S,
    config: &Config,
    args: &Args,
    running: Arc<AtomicBool>,
    source_finished: Option<Arc<AtomicBool>>,
) -> Result<()> {
    let mut tracker = WorkoutTracker::new(config, source);
    let status = tracker.status();

    tracker
        .start(None)
        .context("failed to start pulse source")?;
    info!("workout started");

    let mut last_log = Instant::now();
    while running.load(Ordering::SeqCst) {
        if let Some(finished) = &source_finished {
            if finished.load(Ordering::SeqCst) {
                info!("replay finished");
                break;
            }
        }
        if last_log.elapsed() >= STATUS_LOG_INTERVAL {
            log_status(&status);
            last_log = Instant::now();
        }
        thread::sleep(Duration::from_millis(100));
    }

    tracker.stop();
    log_status(&status);

    if !args.no_save {
        let path = tracker
            .save(&config.log_folder_path)
            .context("failed to save workout log")?;
        info!("workout log written to {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::builder()
        .format_timestamp(None)
        .format_target(false)
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    info!("rowmon v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    match &args.replay {
        Some(path) => {
            let source = CsvReplaySource::new(path).threaded(true).paced(args.pace);
            let finished = source.finished_flag();
            run_workout(source, &config, &args, running, Some(finished))
        }
        None => {
            let source = PiGpioSource::from_config(&config);
            run_workout(source, &config, &args, running, None)
        }
    }
}
