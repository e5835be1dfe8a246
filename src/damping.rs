//! Damping model estimation.
//!
//! During a stroke's recovery phase the rower applies no force, so the only
//! torque on the flywheel is the machine's damping. Fitting acceleration as
//! a function of speed over that phase yields a per-stroke damping model,
//! which the pipeline then subtracts from net torque to isolate what the
//! rower contributed.
//!
//! ## Window selection
//! A long pause between strokes leaves a large time gap inside the recovery
//! phase with no samples in it. To keep the fit on actual observations, the
//! estimator trims the recovery to its middle 50% and iteratively drops
//! trailing samples until that middle window holds enough data points.

use log::debug;

use crate::person::Stroke;
use crate::series::TimeSeries;

/// Fewest samples a least-squares line fit is trusted with.
const MIN_FIT_SAMPLES: usize = 3;
/// Fraction of the recovery span cut from each end of the fit window.
const WINDOW_CUTOFF_FRACTION: f64 = 0.25;
/// Below this speed variance the slope is unidentifiable and the fit
/// degrades to the zero model.
const MIN_SPEED_VARIANCE: f64 = 1e-12;

/// Linear relation between flywheel speed and damping deceleration.
///
/// One model is fitted per completed stroke and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DampingModel {
    pub intercept: f64,
    pub slope: f64,
}

impl DampingModel {
    pub const ZERO: DampingModel = DampingModel {
        intercept: 0.0,
        slope: 0.0,
    };

    /// Expected flywheel acceleration due to damping at the given speed.
    pub fn evaluate(&self, speed: f64) -> f64 {
        self.intercept + self.slope * speed
    }
}

/// Estimator variant selected by machine type.
///
/// Magnetic machines damp linearly in flywheel speed. Air and water
/// machines would slot in here as additional variants with higher-order
/// fits.
#[derive(Debug, Clone, Copy)]
pub enum DampingEstimator {
    Linear(LinearDampingEstimator),
}

impl DampingEstimator {
    pub fn fit(
        &self,
        stroke: &Stroke,
        flywheel_speed: &TimeSeries,
        flywheel_acceleration: &TimeSeries,
        previous_model: Option<&DampingModel>,
    ) -> DampingModel {
        match self {
            DampingEstimator::Linear(estimator) => {
                estimator.fit(stroke, flywheel_speed, flywheel_acceleration, previous_model)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinearDampingEstimator;

impl LinearDampingEstimator {
    /// Fit `acceleration = intercept + slope * speed` to the middle of the
    /// stroke's recovery phase.
    ///
    /// A stroke too slow to produce enough recovery samples reuses the
    /// previous model unchanged, or the zero model when none exists yet.
    /// The zero model overestimates person torque for that stroke, but a
    /// stroke that slow carries very little work anyway.
    pub fn fit(
        &self,
        stroke: &Stroke,
        flywheel_speed: &TimeSeries,
        flywheel_acceleration: &TimeSeries,
        previous_model: Option<&DampingModel>,
    ) -> DampingModel {
        let acceleration_samples = flywheel_acceleration
            .slice(stroke.start_of_recovery_idx..stroke.end_of_recovery_idx + 1);
        // Speed leads acceleration by one sample; one extra sample at the end
        // lets the midpoint interpolation line up with the acceleration
        // timestamps.
        let speed_samples =
            flywheel_speed.slice(stroke.start_of_recovery_idx..stroke.end_of_recovery_idx + 2);
        let interpolated_speed = speed_samples.interpolate_midpoints();

        let window = match select_fit_window(&acceleration_samples) {
            Some(window) => window,
            None => {
                let fallback = previous_model.copied().unwrap_or(DampingModel::ZERO);
                debug!(
                    "stroke ending at {:.2}s has {} recovery sample(s), reusing model ({:.4}, {:.4})",
                    stroke.end_time,
                    acceleration_samples.len(),
                    fallback.intercept,
                    fallback.slope
                );
                return fallback;
            }
        };

        let speed_window = interpolated_speed.time_slice(
            window.timestamps()[0],
            window.timestamps()[window.len() - 1],
        );
        assert_eq!(
            speed_window.len(),
            window.len(),
            "recovery speed and acceleration windows are misaligned"
        );
        least_squares_line(speed_window.values(), window.values())
    }
}

/// Select the sub-series of recovery acceleration samples to fit against.
///
/// Returns None when the recovery is too short to fit anything.
fn select_fit_window(acceleration_samples: &TimeSeries) -> Option<TimeSeries> {
    if acceleration_samples.len() < MIN_FIT_SAMPLES {
        return None;
    }
    if acceleration_samples.len() == MIN_FIT_SAMPLES {
        return Some(acceleration_samples.clone());
    }

    let timestamps = acceleration_samples.timestamps();
    let mut last_idx = acceleration_samples.len() - 1;
    // Drop trailing samples until the middle window holds more than the
    // minimum number of points. Gaps live at the tail of the recovery (the
    // flywheel coasting or stopped before the next drive), which is why the
    // trim walks backwards.
    while last_idx + 1 > MIN_FIT_SAMPLES {
        let span = timestamps[last_idx] - timestamps[0];
        let offset = span * WINDOW_CUTOFF_FRACTION;
        let candidate = acceleration_samples
            .time_slice(timestamps[0] + offset, timestamps[last_idx] - offset);
        if candidate.len() > MIN_FIT_SAMPLES {
            return Some(candidate);
        }
        last_idx -= 1;
    }
    // Recovery is short but gapless; fit over everything we have.
    Some(acceleration_samples.clone())
}

/// Ordinary least squares with intercept.
fn least_squares_line(x: &[f64], y: &[f64]) -> DampingModel {
    debug_assert_eq!(x.len(), y.len());
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut variance_x = 0.0;
    let mut covariance_xy = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        variance_x += (xi - mean_x) * (xi - mean_x);
        covariance_xy += (xi - mean_x) * (yi - mean_y);
    }

    if variance_x < MIN_SPEED_VARIANCE {
        return DampingModel::ZERO;
    }
    let slope = covariance_xy / variance_x;
    DampingModel {
        intercept: mean_y - slope * mean_x,
        slope,
    }
}

// ============================================================================
// TESTS
// ============================================================================
