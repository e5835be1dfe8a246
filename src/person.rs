//! Rower-side metrics: stroke detection, stroke analysis, person torque.
//!
//! ## Stroke boundary detection
//! A stroke starts where flywheel acceleration crosses from negative to
//! positive (the rower picks the handle back up). The crossing alone is too
//! twitchy near zero speed, so a candidate boundary only finalizes a stroke
//! when at least the minimum stroke duration has elapsed since the ongoing
//! stroke began. Nobody rows 60 strokes per minute.
//!
//! ## Person torque
//! Net torque on the flywheel is `inertia * acceleration`. Subtracting the
//! modeled damping torque leaves the rower's contribution, clamped at zero
//! since the rower cannot pull backwards through a one-way clutch.

use log::debug;

use crate::machine::MachineMetrics;
use crate::series::TimeSeries;

/// Boundary candidates closer together than this are the same stroke.
const MINIMUM_STROKE_DURATION_SECONDS: f64 = 1.0;
/// Damping torque is appended from the same acceleration sample the person
/// torque reads, so their timestamps must match to within float noise.
const TIMESTAMP_ALIGNMENT_TOLERANCE_SECONDS: f64 = 1e-9;

/// One completed stroke, analyzed at the moment its end was detected.
///
/// Index fields refer to positions in the flywheel acceleration series (and
/// therefore also in the person torque and damping torque series, which run
/// sample-for-sample with it).
#[derive(Debug, Clone)]
pub struct Stroke {
    pub start_idx: usize,
    pub end_idx: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub start_of_drive_idx: usize,
    pub end_of_drive_idx: usize,
    pub start_of_recovery_idx: usize,
    pub end_of_recovery_idx: usize,
    pub duration: f64,
    /// Recovery duration over drive duration; read as "1 : r".
    pub drive_to_recovery_ratio: f64,
    /// Units: torque * revolutions.
    pub work_done_by_person: f64,
    pub average_power: f64,
}

impl Stroke {
    fn new(
        start_idx: usize,
        end_idx: usize,
        machine: &MachineMetrics,
        person_torque: &TimeSeries,
    ) -> Stroke {
        let acceleration = &machine.flywheel_acceleration;
        let start_time = acceleration.get(start_idx).timestamp;
        let end_time = acceleration.get(end_idx).timestamp;
        let duration = end_time - start_time;

        let (start_of_drive_idx, end_of_drive_idx, start_of_recovery_idx, end_of_recovery_idx) =
            segment_stroke(acceleration, start_idx, end_idx);

        let drive_duration = acceleration.get(end_of_drive_idx).timestamp
            - acceleration.get(start_of_drive_idx).timestamp;
        let recovery_duration = duration - drive_duration;
        let drive_to_recovery_ratio = recovery_duration / drive_duration;

        let work_done_by_person = integrate_work(
            start_idx,
            end_idx,
            &machine.flywheel_speed,
            person_torque,
        );

        Stroke {
            start_idx,
            end_idx,
            start_time,
            end_time,
            start_of_drive_idx,
            end_of_drive_idx,
            start_of_recovery_idx,
            end_of_recovery_idx,
            duration,
            drive_to_recovery_ratio,
            work_done_by_person,
            average_power: work_done_by_person / duration,
        }
    }
}

/// Split a stroke into drive and recovery at the last occurrence of the
/// minimum acceleration: the deepest deceleration is where the rower let go
/// of the handle.
fn segment_stroke(
    acceleration: &TimeSeries,
    start_idx: usize,
    end_idx: usize,
) -> (usize, usize, usize, usize) {
    let values = &acceleration.values()[start_idx..end_idx];
    let end_of_drive_idx = match values.iter().enumerate().fold(None, |lowest, (idx, &value)| {
        match lowest {
            Some((_, lowest_value)) if value > lowest_value => lowest,
            _ => Some((idx, value)),
        }
    }) {
        Some((idx, _)) => start_idx + idx,
        // Single-sample stroke; everything is drive
        None => start_idx,
    };
    (start_idx, end_of_drive_idx, end_of_drive_idx + 1, end_idx)
}

/// Numeric integration of `person_torque * d_theta` over the stroke.
///
/// Speed leads the torque series by one sample and we take one extra
/// look-ahead sample past the stroke, so the midpoint-interpolated speed
/// covers the rotational distance of the final time step.
fn integrate_work(
    start_idx: usize,
    end_idx: usize,
    flywheel_speed: &TimeSeries,
    person_torque: &TimeSeries,
) -> f64 {
    let torque_samples = person_torque.slice(start_idx..end_idx + 1);
    let speed_samples = flywheel_speed.slice(start_idx..end_idx + 3);
    let interpolated_speed = speed_samples.interpolate_midpoints();

    let mut work = 0.0;
    for idx in 0..torque_samples.len() {
        let instantaneous_speed =
            (interpolated_speed.values()[idx] + interpolated_speed.values()[idx + 1]) / 2.0;
        let time_step =
            interpolated_speed.timestamps()[idx + 1] - torque_samples.timestamps()[idx];
        let delta_revolutions = instantaneous_speed * time_step;
        work += torque_samples.values()[idx] * delta_revolutions;
    }
    work
}

/// Stroke state machine plus the live person-torque series.
#[derive(Debug, Default)]
pub struct PersonMetrics {
    pub torque: TimeSeries,
    pub strokes: Vec<Stroke>,
    start_of_ongoing_stroke_idx: usize,
    start_of_ongoing_stroke_timestamp: f64,
}

impl PersonMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stroke boundary detection. Runs after the machine's speed and
    /// acceleration update but before its damping update, so that a stroke
    /// finalized here gets its damping model fitted within the same pulse.
    pub fn detect_stroke(&mut self, machine: &MachineMetrics) {
        let acceleration = &machine.flywheel_acceleration;
        if acceleration.len() < 2 {
            return;
        }
        let newest = acceleration.from_end(1);
        let previous = acceleration.from_end(2);
        let rising_edge = newest.value >= 0.0 && previous.value < 0.0;
        let elapsed = newest.timestamp - self.start_of_ongoing_stroke_timestamp;
        if !rising_edge || elapsed <= MINIMUM_STROKE_DURATION_SECONDS {
            return;
        }

        // The newest sample is the first of the next stroke; the stroke being
        // finalized ends one sample earlier.
        let start_idx = self.start_of_ongoing_stroke_idx;
        let end_idx = acceleration.len() - 2;
        let stroke = Stroke::new(start_idx, end_idx, machine, &self.torque);
        debug!(
            "stroke {}: [{:.2}s, {:.2}s] work {:.3} ratio 1:{:.1}",
            self.strokes.len() + 1,
            stroke.start_time,
            stroke.end_time,
            stroke.work_done_by_person,
            stroke.drive_to_recovery_ratio
        );
        self.strokes.push(stroke);
        self.start_of_ongoing_stroke_idx = acceleration.len() - 1;
        self.start_of_ongoing_stroke_timestamp = newest.timestamp;
    }

    /// Person torque append. Runs after the machine's damping-torque append
    /// so both series cover the same acceleration sample.
    pub fn update_torque(&mut self, machine: &MachineMetrics) {
        let acceleration = &machine.flywheel_acceleration;
        if acceleration.is_empty() {
            return;
        }
        let newest = acceleration.from_end(1);
        let net_torque = newest.value * machine.inertia();
        let damping_torque = match machine.damping_torque.last() {
            Some(sample) => {
                assert!(
                    (sample.timestamp - newest.timestamp).abs()
                        < TIMESTAMP_ALIGNMENT_TOLERANCE_SECONDS,
                    "flywheel acceleration and damping torque time series aren't aligned: \
                     {} vs {}",
                    newest.timestamp,
                    sample.timestamp
                );
                sample.value
            }
            None => 0.0,
        };
        let person_torque = (net_torque - damping_torque).max(0.0);
        self.torque.append(person_torque, newest.timestamp);
    }
}

// ============================================================================
// TESTS
// ============================================================================
