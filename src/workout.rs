//! Workout orchestration.
//!
//! `WorkoutCore` runs the per-pulse pipeline; `WorkoutTracker` wires a pulse
//! source to it and fans results out to a status snapshot and an optional
//! observer.
//!
//! ## Per-pulse ordering
//! Machine speed/acceleration, then person stroke detection, then the
//! machine damping update, then the person torque, then the boat. This is
//! the one ordering that satisfies every alignment invariant: a stroke
//! detected on this pulse gets its damping model fitted before the damping
//! torque sample is appended, and the person torque reads a damping torque
//! from the same acceleration sample it is about to consume. There is a
//! chicken-and-egg between the machine (needs a stroke to fit a model) and
//! the person (needs damping torque to split net torque); both take the
//! damping torque as zero until the first stroke completes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result};
use chrono::Local;
use log::{info, warn};

use crate::boat::BoatModel;
use crate::config::Config;
use crate::error::SourceError;
use crate::machine::MachineMetrics;
use crate::person::PersonMetrics;
use crate::replay::RAW_TICKS_COLUMN_NAME;
use crate::status::WorkoutStatus;
use crate::traits::{PulseHandler, PulseSource, WorkoutObserver};

/// All pipeline state for one workout.
pub struct WorkoutCore {
    /// Every raw tick observed, for persistence and replay
    pub raw_ticks: Vec<u32>,
    pub machine: MachineMetrics,
    pub person: PersonMetrics,
    pub boat: BoatModel,
}

impl WorkoutCore {
    pub fn new(config: &Config) -> Self {
        WorkoutCore {
            raw_ticks: Vec::new(),
            machine: MachineMetrics::new(
                config.num_flywheel_encoder_pulses_per_revolution as usize,
                config.flywheel_moment_of_inertia,
                config.damping_estimator(),
            ),
            person: PersonMetrics::new(),
            boat: BoatModel::new(),
        }
    }

    /// Run one pulse through the whole pipeline.
    pub fn process_pulse(&mut self, pulse_time: f64, raw_tick: u32) {
        self.raw_ticks.push(raw_tick);
        if self.machine.update_flywheel(pulse_time) {
            self.person.detect_stroke(&self.machine);
            self.machine.update_damping(&self.person);
            self.person.update_torque(&self.machine);
        }
        self.boat.update(&self.machine);
    }

    /// Write the raw-pulse log as a one-column CSV named after the current
    /// wall-clock time. The file alone is enough to replay the workout.
    pub fn save(&self, output_folder: &Path) -> Result<PathBuf> {
        let file_name = Local::now().format("%Y-%m-%d %Hh%Mm%Ss.csv").to_string();
        let path = output_folder.join(file_name);
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        writer.write_record([RAW_TICKS_COLUMN_NAME])?;
        for tick in &self.raw_ticks {
            writer.write_record([tick.to_string()])?;
        }
        writer.flush()?;
        info!(
            "saved {} raw ticks to {}",
            self.raw_ticks.len(),
            path.display()
        );
        Ok(path)
    }
}

/// Owns the pipeline and a pulse source; the public face of the crate.
///
/// The core lives behind a mutex taken once per pulse, so exactly one pulse
/// is processed to completion at a time no matter which thread the source
/// delivers from. After `stop` the state stays readable for post-processing.
pub struct WorkoutTracker<S: PulseSource> {
    source: S,
    core: Arc<Mutex<WorkoutCore>>,
    status: Arc<RwLock<WorkoutStatus>>,
    started: bool,
}

impl<S: PulseSource> WorkoutTracker<S> {
    pub fn new(config: &Config, source: S) -> Self {
        WorkoutTracker {
            source,
            core: Arc::new(Mutex::new(WorkoutCore::new(config))),
            status: Arc::new(RwLock::new(WorkoutStatus::default())),
            started: false,
        }
    }

    /// Shared handle to the pipeline state. Lock it after `stop` (or from an
    /// observer) to read the full time series.
    pub fn core(&self) -> Arc<Mutex<WorkoutCore>> {
        Arc::clone(&self.core)
    }

    /// Shared snapshot refreshed after every pulse.
    pub fn status(&self) -> Arc<RwLock<WorkoutStatus>> {
        Arc::clone(&self.status)
    }

    /// Subscribe to the pulse source and begin processing.
    pub fn start(
        &mut self,
        observer: Option<Box<dyn WorkoutObserver>>,
    ) -> Result<(), SourceError> {
        if self.started {
            return Err(SourceError::AlreadyStarted);
        }
        let core = Arc::clone(&self.core);
        let status = Arc::clone(&self.status);
        let mut observer = observer;

        let handler: PulseHandler = Box::new(move |pulse_time, raw_tick| {
            let mut workout = match core.lock() {
                Ok(workout) => workout,
                // A previous pulse panicked mid-pipeline; the state is not
                // trustworthy, so drop everything that follows
                Err(_) => return,
            };
            workout.process_pulse(pulse_time, raw_tick);
            if let Ok(mut snapshot) = status.write() {
                snapshot.refresh(&workout);
            }
            if let Some(observer) = observer.as_mut() {
                if let Err(e) = observer.updated(&workout) {
                    warn!("observer error ignored: {:#}", e);
                }
            }
        });

        self.source.start(handler)?;
        self.started = true;
        Ok(())
    }

    /// Unsubscribe from the source. In-flight pulses complete; pipeline
    /// state remains readable.
    pub fn stop(&mut self) {
        if self.started {
            self.source.stop();
            self.started = false;
        }
    }

    /// Write the raw-pulse log to the given folder.
    pub fn save(&self, output_folder: &Path) -> Result<PathBuf> {
        let workout = self
            .core
            .lock()
            .map_err(|_| anyhow::anyhow!("workout state poisoned by an earlier panic"))?;
        workout.save(output_folder)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{MockPulseSource, MockWorkoutObserver};

    fn constant_speed_ticks(count: u32) -> Vec<u32> {
        (0..count).map(|k| k * 250_000).collect()
    }

    fn run_pulses(workout: &mut WorkoutCore, ticks: &[u32]) {
        let mut ingest = crate::ingest::PulseIngest::new();
        for &tick in ticks {
            workout.process_pulse(ingest.seconds_since_first_pulse(tick), tick);
        }
    }

    // ========================================================================
    // PIPELINE INVARIANTS
    // ========================================================================

    #[test]
    fn test_series_lengths_after_each_pulse() {
        let mut workout = WorkoutCore::new(&Config::default());
        let ticks = constant_speed_ticks(20);
        let mut ingest = crate::ingest::PulseIngest::new();
        for (n, &tick) in ticks.iter().enumerate() {
            workout.process_pulse(ingest.seconds_since_first_pulse(tick), tick);
            let pulses = n + 1;
            let expected_speed = pulses.saturating_sub(4);
            let expected_accel = expected_speed.saturating_sub(1);
            assert_eq!(workout.machine.flywheel_speed.len(), expected_speed);
            assert_eq!(workout.machine.flywheel_acceleration.len(), expected_accel);
            assert_eq!(workout.machine.damping_torque.len(), expected_accel);
            assert_eq!(workout.person.torque.len(), expected_accel);
            assert_eq!(workout.boat.position.len(), pulses);
        }
    }

    #[test]
    fn test_torque_series_timestamps_align() {
        let mut workout = WorkoutCore::new(&Config::default());
        run_pulses(&mut workout, &constant_speed_ticks(15));
        assert_eq!(
            workout.machine.damping_torque.timestamps(),
            workout.machine.flywheel_acceleration.timestamps()
        );
        assert_eq!(
            workout.person.torque.timestamps(),
            workout.machine.flywheel_acceleration.timestamps()
        );
    }

    #[test]
    fn test_constant_speed_produces_no_strokes() {
        let mut workout = WorkoutCore::new(&Config::default());
        run_pulses(&mut workout, &constant_speed_ticks(30));
        assert!(workout.person.strokes.is_empty());
        assert!(workout.machine.damping_models.is_empty());
        for &v in workout.machine.flywheel_speed.values() {
            assert!((v - 1.0).abs() < 1e-9);
        }
    }

    // ========================================================================
    // TRACKER
    // ========================================================================

    #[test]
    fn test_tracker_rejects_double_start() {
        let mut source = MockPulseSource::new();
        source.expect_start().times(1).returning(|_| Ok(()));
        let mut tracker = WorkoutTracker::new(&Config::default(), source);
        tracker.start(None).unwrap();
        assert!(matches!(
            tracker.start(None),
            Err(SourceError::AlreadyStarted)
        ));
    }

    #[test]
    fn test_tracker_processes_pulses_from_source() {
        let mut source = MockPulseSource::new();
        source.expect_start().returning(|mut handler| {
            let mut ingest = crate::ingest::PulseIngest::new();
            for k in 0..7u32 {
                let tick = k * 250_000;
                handler(ingest.seconds_since_first_pulse(tick), tick);
            }
            Ok(())
        });
        source.expect_stop().times(1).return_const(());

        let mut tracker = WorkoutTracker::new(&Config::default(), source);
        tracker.start(None).unwrap();
        tracker.stop();

        let core = tracker.core();
        let workout = core.lock().unwrap();
        assert_eq!(workout.raw_ticks.len(), 7);
        assert_eq!(workout.machine.flywheel_speed.len(), 3);

        let status = tracker.status();
        let snapshot = status.read().unwrap();
        assert_eq!(snapshot.pulse_count, 7);
        assert_eq!(snapshot.distance_m, 1.5);
    }

    #[test]
    fn test_observer_notified_once_per_pulse() {
        let mut source = MockPulseSource::new();
        source.expect_start().returning(|mut handler| {
            let mut ingest = crate::ingest::PulseIngest::new();
            for k in 0..5u32 {
                let tick = k * 250_000;
                handler(ingest.seconds_since_first_pulse(tick), tick);
            }
            Ok(())
        });
        source.expect_stop().return_const(());

        let mut observer = MockWorkoutObserver::new();
        observer.expect_updated().times(5).returning(|_| Ok(()));

        let mut tracker = WorkoutTracker::new(&Config::default(), source);
        tracker.start(Some(Box::new(observer))).unwrap();
        tracker.stop();
    }

    #[test]
    fn test_observer_errors_do_not_halt_pipeline() {
        let mut source = MockPulseSource::new();
        source.expect_start().returning(|mut handler| {
            let mut ingest = crate::ingest::PulseIngest::new();
            for k in 0..6u32 {
                let tick = k * 250_000;
                handler(ingest.seconds_since_first_pulse(tick), tick);
            }
            Ok(())
        });
        source.expect_stop().return_const(());

        let mut observer = MockWorkoutObserver::new();
        observer
            .expect_updated()
            .times(6)
            .returning(|_| Err(anyhow::anyhow!("render surface lost")));

        let mut tracker = WorkoutTracker::new(&Config::default(), source);
        tracker.start(Some(Box::new(observer))).unwrap();
        tracker.stop();

        let core = tracker.core();
        assert_eq!(core.lock().unwrap().raw_ticks.len(), 6);
    }

    // ========================================================================
    // SAVE
    // ========================================================================

    #[test]
    fn test_save_writes_one_column_csv() {
        let mut workout = WorkoutCore::new(&Config::default());
        run_pulses(&mut workout, &[1_000, 2_000, 3_000]);

        let folder = tempfile::tempdir().unwrap();
        let path = workout.save(folder.path()).unwrap();
        assert_eq!(path.extension().unwrap(), "csv");

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["ticks", "1000", "2000", "3000"]);
    }
}
