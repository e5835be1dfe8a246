//! Boat model: a wheel rolling on the ground at the flywheel's rotational
//! speed. Position advances one wheel circumference per flywheel
//! revolution, and linear speed is rotational speed times circumference.

use crate::machine::MachineMetrics;
use crate::series::TimeSeries;

/// Circumference of the imaginary wheel. A calibration point in disguise:
/// scale it to taste to match a real boat's hull speed.
const DEFAULT_WHEEL_CIRCUMFERENCE_METERS: f64 = 1.0;

pub struct BoatModel {
    circumference_m: f64,
    pub position: TimeSeries,
    pub speed: TimeSeries,
}

impl Default for BoatModel {
    fn default() -> Self {
        Self::new()
    }
}

impl BoatModel {
    pub fn new() -> Self {
        Self::with_circumference(DEFAULT_WHEEL_CIRCUMFERENCE_METERS)
    }

    pub fn with_circumference(circumference_m: f64) -> Self {
        BoatModel {
            circumference_m,
            position: TimeSeries::new(),
            speed: TimeSeries::new(),
        }
    }

    /// Runs once per flywheel pulse, after the machine metrics update.
    pub fn update(&mut self, machine: &MachineMetrics) {
        let pulse_time = *machine
            .pulse_timestamps
            .last()
            .expect("boat update runs after the pulse is recorded");
        let position = match self.position.last() {
            None => 0.0,
            Some(sample) => sample.value + 1.0 / machine.pulses_per_rev() as f64,
        };
        self.position.append(position, pulse_time);

        if let Some(flywheel_speed) = machine.flywheel_speed.last() {
            self.speed.append(
                flywheel_speed.value * self.circumference_m,
                flywheel_speed.timestamp,
            );
        }
    }
}
