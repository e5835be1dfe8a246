//! Machine-side metrics: flywheel speed, acceleration, damping torque.
//!
//! ## Speed from same-hole pulse pairs
//! The holes in the flywheel are not perfectly evenly spaced, so the time
//! between adjacent pulses mixes speed with hole geometry. Measuring one
//! full revolution between pulses from the same physical hole (P pulses
//! apart) cancels the geometric error. The average speed of that revolution
//! is assigned to the timestamp at its middle, consistent with assuming
//! speed changes linearly within a revolution.
//!
//! ## Ordering within a pulse
//! The damping update runs after stroke detection has seen this pulse, so a
//! stroke finalized on this pulse gets its damping model fitted immediately
//! and `damping_models` stays in lockstep with the stroke list. Until the
//! first stroke completes there is no model and the damping torque is taken
//! as zero; the person metrics make the same assumption.

use log::warn;

use crate::damping::{DampingEstimator, DampingModel};
use crate::person::PersonMetrics;
use crate::series::TimeSeries;

pub struct MachineMetrics {
    pulses_per_rev: usize,
    inertia: f64,
    estimator: DampingEstimator,

    pub pulse_timestamps: Vec<f64>,
    pub flywheel_speed: TimeSeries,
    pub flywheel_acceleration: TimeSeries,
    pub damping_torque: TimeSeries,
    pub damping_models: Vec<DampingModel>,

    strokes_seen: usize,
}

impl MachineMetrics {
    pub fn new(pulses_per_rev: usize, inertia: f64, estimator: DampingEstimator) -> Self {
        MachineMetrics {
            pulses_per_rev,
            inertia,
            estimator,
            pulse_timestamps: Vec::new(),
            flywheel_speed: TimeSeries::new(),
            flywheel_acceleration: TimeSeries::new(),
            damping_torque: TimeSeries::new(),
            damping_models: Vec::new(),
            strokes_seen: 0,
        }
    }

    pub fn pulses_per_rev(&self) -> usize {
        self.pulses_per_rev
    }

    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    /// Record the pulse and extend the speed and acceleration series.
    ///
    /// Returns true when a new acceleration sample was produced; the rest of
    /// the pipeline only runs for this pulse in that case, keeping the
    /// derived series in lockstep.
    pub fn update_flywheel(&mut self, pulse_time: f64) -> bool {
        self.pulse_timestamps.push(pulse_time);
        if !self.update_speed() {
            return false;
        }
        self.update_acceleration()
    }

    /// Damping-model fit for a freshly detected stroke, then the per-pulse
    /// damping torque sample.
    pub fn update_damping(&mut self, person: &PersonMetrics) {
        if person.strokes.len() > self.strokes_seen {
            let stroke = &person.strokes[person.strokes.len() - 1];
            let model = self.estimator.fit(
                stroke,
                &self.flywheel_speed,
                &self.flywheel_acceleration,
                self.damping_models.last(),
            );
            self.damping_models.push(model);
            self.strokes_seen += 1;
        }
        self.update_damping_torque();
    }

    fn update_speed(&mut self) -> bool {
        // One full revolution observed yet?
        if self.pulse_timestamps.len() < self.pulses_per_rev + 1 {
            return false;
        }
        let count = self.pulse_timestamps.len();
        let start_of_revolution = self.pulse_timestamps[count - 1 - self.pulses_per_rev];
        let end_of_revolution = self.pulse_timestamps[count - 1];
        let revolution_time = end_of_revolution - start_of_revolution;
        if revolution_time <= 0.0 {
            warn!(
                "zero-duration revolution at {:.6}s, skipping this pulse's derived samples",
                end_of_revolution
            );
            return false;
        }
        self.flywheel_speed.append(
            1.0 / revolution_time,
            (start_of_revolution + end_of_revolution) / 2.0,
        );
        true
    }

    fn update_acceleration(&mut self) -> bool {
        if self.flywheel_speed.len() < 2 {
            return false;
        }
        let previous = self.flywheel_speed.from_end(2);
        let newest = self.flywheel_speed.from_end(1);
        let time_delta = newest.timestamp - previous.timestamp;
        if time_delta <= 0.0 {
            warn!(
                "speed samples {:.6}s apart at {:.6}s, skipping acceleration sample",
                time_delta, newest.timestamp
            );
            return false;
        }
        self.flywheel_acceleration.append(
            (newest.value - previous.value) / time_delta,
            (previous.timestamp + newest.timestamp) / 2.0,
        );
        true
    }

    fn update_damping_torque(&mut self) {
        if self.flywheel_speed.len() < 2 {
            return;
        }
        let damping_torque = match self.damping_models.last() {
            // No fitted model during the first stroke
            None => 0.0,
            Some(model) => {
                let mid_speed = (self.flywheel_speed.from_end(1).value
                    + self.flywheel_speed.from_end(2).value)
                    / 2.0;
                model.evaluate(mid_speed) * self.inertia
            }
        };
        self.damping_torque
            .append(damping_torque, self.flywheel_acceleration.from_end(1).timestamp);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::damping::LinearDampingEstimator;

    fn machine() -> MachineMetrics {
        MachineMetrics::new(4, 1.0, DampingEstimator::Linear(LinearDampingEstimator))
    }

    // ========================================================================
    // SPEED
    // ========================================================================

    #[test]
    fn test_no_speed_until_full_revolution() {
        let mut m = machine();
        for k in 0..4 {
            m.update_flywheel(k as f64 * 0.25);
        }
        assert!(m.flywheel_speed.is_empty());
    }

    #[test]
    fn test_constant_rate_pulses_give_constant_speed() {
        let mut m = machine();
        // One pulse every 0.25s with P=4: exactly 1 rev/s
        for k in 0..7 {
            m.update_flywheel(k as f64 * 0.25);
        }
        assert_eq!(m.flywheel_speed.len(), 3);
        for &v in m.flywheel_speed.values() {
            assert!((v - 1.0).abs() < 1e-12);
        }
        // Mid-revolution timestamps
        assert_eq!(m.flywheel_speed.timestamps(), &[0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_speed_series_length_tracks_pulse_count() {
        let mut m = machine();
        for k in 0..20 {
            m.update_flywheel(k as f64 * 0.25);
            let expected = (m.pulse_timestamps.len()).saturating_sub(m.pulses_per_rev());
            assert_eq!(m.flywheel_speed.len(), expected);
        }
    }

    // ========================================================================
    // ACCELERATION
    // ========================================================================

    #[test]
    fn test_constant_speed_gives_zero_acceleration() {
        let mut m = machine();
        for k in 0..7 {
            m.update_flywheel(k as f64 * 0.25);
        }
        assert_eq!(m.flywheel_acceleration.len(), 2);
        for &a in m.flywheel_acceleration.values() {
            assert_eq!(a, 0.0);
        }
    }

    #[test]
    fn test_acceleration_midpoint_timestamps() {
        let mut m = machine();
        for k in 0..7 {
            m.update_flywheel(k as f64 * 0.25);
        }
        // Acceleration timestamps sit between the speed timestamps
        assert_eq!(m.flywheel_acceleration.timestamps(), &[0.625, 0.875]);
    }

    #[test]
    fn test_speeding_up_gives_positive_acceleration() {
        let mut m = machine();
        let mut t = 0.0;
        let mut gap = 0.25;
        for _ in 0..8 {
            m.update_flywheel(t);
            t += gap;
            gap *= 0.9;
        }
        assert!(!m.flywheel_acceleration.is_empty());
        for &a in m.flywheel_acceleration.values() {
            assert!(a > 0.0);
        }
    }

    // ========================================================================
    // DAMPING TORQUE
    // ========================================================================

    #[test]
    fn test_damping_torque_is_zero_before_first_model() {
        let mut m = machine();
        let person = PersonMetrics::new();
        for k in 0..8 {
            if m.update_flywheel(k as f64 * 0.25) {
                m.update_damping(&person);
            }
        }
        assert_eq!(m.damping_torque.len(), m.flywheel_acceleration.len());
        for &torque in m.damping_torque.values() {
            assert_eq!(torque, 0.0);
        }
    }

    #[test]
    fn test_damping_torque_timestamps_match_acceleration() {
        let mut m = machine();
        let person = PersonMetrics::new();
        for k in 0..12 {
            if m.update_flywheel(k as f64 * 0.25) {
                m.update_damping(&person);
            }
        }
        assert_eq!(
            m.damping_torque.timestamps(),
            m.flywheel_acceleration.timestamps()
        );
    }

    #[test]
    fn test_damping_torque_uses_latest_model() {
        let mut m = machine();
        let person = PersonMetrics::new();
        for k in 0..7 {
            m.update_flywheel(k as f64 * 0.25);
        }
        m.damping_models.push(DampingModel {
            intercept: -0.5,
            slope: -0.25,
        });
        m.update_damping(&person);
        // Mid speed is 1.0 rev/s: torque = (-0.5 - 0.25) * inertia
        let newest = m.damping_torque.from_end(1);
        assert!((newest.value - -0.75).abs() < 1e-12);
    }

    // ========================================================================
    // DUPLICATE TIMESTAMPS
    // ========================================================================

    #[test]
    fn test_duplicate_pulse_timestamp_skips_derived_samples() {
        let mut m = machine();
        for k in 0..7 {
            m.update_flywheel(k as f64 * 0.25);
        }
        // Stalled flywheel: pulses keep arriving with a frozen timestamp.
        // The same-hole revolution window still spans real time for the
        // first few duplicates, then shrinks to zero.
        for _ in 0..3 {
            assert!(m.update_flywheel(1.5));
        }
        let speed_len = m.flywheel_speed.len();
        let accel_len = m.flywheel_acceleration.len();
        for _ in 0..5 {
            assert!(!m.update_flywheel(1.5));
        }
        assert_eq!(m.flywheel_speed.len(), speed_len);
        assert_eq!(m.flywheel_acceleration.len(), accel_len);
    }
}
