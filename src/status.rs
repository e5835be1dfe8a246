use serde::{Deserialize, Serialize};

use crate::workout::WorkoutCore;

/// Workout snapshot refreshed after every pulse, for rendering or IPC.
///
/// This is the consumer-facing copy of the pipeline state: a UI polls it (or
/// receives it through an observer) instead of reaching into the time series
/// from another thread. Per-stroke fields hold the values of the most
/// recently completed stroke and stay at zero until the first stroke lands.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WorkoutStatus {
    /// Timestamp of the newest pulse (seconds since the first pulse)
    pub elapsed_seconds: f64,

    /// Raw pulses observed so far
    pub pulse_count: u64,

    /// Boat distance covered (meters)
    pub distance_m: f64,

    /// Latest boat speed sample (m/s)
    pub boat_speed_m_per_s: f64,

    /// Completed strokes
    pub stroke_count: usize,

    /// Cadence from the last completed stroke's duration
    pub strokes_per_minute: f64,

    /// Numeric recovery/drive ratio of the last stroke; display as "1:r"
    pub stroke_ratio: f64,

    /// Work done by the rower in the last stroke (torque * revolutions)
    pub work_per_stroke: f64,

    /// Average power over the last stroke
    pub average_power: f64,

    /// Time-weighted boat speed over the last stroke's window (m/s)
    pub stroke_avg_boat_speed_m_per_s: f64,

    /// Pace over 500 m at the last stroke's average speed (seconds)
    pub split_seconds_per_500m: f64,
}

impl Default for WorkoutStatus {
    fn default() -> Self {
        WorkoutStatus {
            elapsed_seconds: 0.0,
            pulse_count: 0,
            distance_m: 0.0,
            boat_speed_m_per_s: 0.0,
            stroke_count: 0,
            strokes_per_minute: 0.0,
            stroke_ratio: 0.0,
            work_per_stroke: 0.0,
            average_power: 0.0,
            stroke_avg_boat_speed_m_per_s: 0.0,
            split_seconds_per_500m: 0.0,
        }
    }
}

impl WorkoutStatus {
    pub fn refresh(&mut self, workout: &WorkoutCore) {
        if let Some(&pulse_time) = workout.machine.pulse_timestamps.last() {
            self.elapsed_seconds = pulse_time;
        }
        self.pulse_count = workout.raw_ticks.len() as u64;
        if let Some(position) = workout.boat.position.last() {
            self.distance_m = position.value;
        }
        if let Some(speed) = workout.boat.speed.last() {
            self.boat_speed_m_per_s = speed.value;
        }

        self.stroke_count = workout.person.strokes.len();
        if let Some(stroke) = workout.person.strokes.last() {
            self.strokes_per_minute = 60.0 / stroke.duration;
            self.stroke_ratio = stroke.drive_to_recovery_ratio;
            self.work_per_stroke = stroke.work_done_by_person;
            self.average_power = stroke.average_power;
            self.stroke_avg_boat_speed_m_per_s = workout
                .boat
                .speed
                .average_value(Some(stroke.start_time), Some(stroke.end_time))
                .unwrap_or(0.0);
            self.split_seconds_per_500m = if self.stroke_avg_boat_speed_m_per_s > 0.0 {
                500.0 / self.stroke_avg_boat_speed_m_per_s
            } else {
                0.0
            };
        }
    }
}
