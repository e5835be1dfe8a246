//! Append-only time series of `(value, timestamp)` samples.
//!
//! Every signal the pipeline derives (flywheel speed, acceleration, torques,
//! boat position) is one of these. Timestamps are seconds since the first
//! observed pulse and never decrease; appending out of order is a bug in the
//! producing component, not a recoverable condition.

use std::ops::Range;
use thiserror::Error;

/// A single measurement: value plus timestamp in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub timestamp: f64,
}

/// Errors from statistics over a time window
#[derive(Error, Debug, PartialEq)]
pub enum SeriesError {
    /// Time-weighted averaging needs at least two samples spanning a
    /// non-zero interval
    #[error("time-weighted average is undefined over {len} sample(s)")]
    DegenerateWindow { len: usize },
}

/// Append-only sequence of samples in non-decreasing timestamp order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    values: Vec<f64>,
    timestamps: Vec<f64>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Append a sample. Timestamps must be non-decreasing.
    pub fn append(&mut self, value: f64, timestamp: f64) {
        if let Some(&last) = self.timestamps.last() {
            assert!(
                timestamp >= last,
                "time series timestamps must be non-decreasing: {} appended after {}",
                timestamp,
                last
            );
        }
        self.values.push(value);
        self.timestamps.push(timestamp);
    }

    /// Sample at `idx`. Panics when out of bounds.
    pub fn get(&self, idx: usize) -> Sample {
        Sample {
            value: self.values[idx],
            timestamp: self.timestamps[idx],
        }
    }

    /// Sample counted from the end; `from_end(1)` is the newest.
    pub fn from_end(&self, back: usize) -> Sample {
        self.get(self.len() - back)
    }

    pub fn last(&self) -> Option<Sample> {
        if self.is_empty() {
            None
        } else {
            Some(self.from_end(1))
        }
    }

    /// Owned copy of the half-open index range.
    pub fn slice(&self, range: Range<usize>) -> TimeSeries {
        TimeSeries {
            values: self.values[range.clone()].to_vec(),
            timestamps: self.timestamps[range].to_vec(),
        }
    }

    /// All samples whose timestamp lies in `[start_time, end_time]`,
    /// inclusive on both ends. Empty result when none qualify.
    pub fn time_slice(&self, start_time: f64, end_time: f64) -> TimeSeries {
        let first = self.timestamps.partition_point(|&t| t < start_time);
        let last = self.timestamps.partition_point(|&t| t <= end_time);
        if first >= last {
            return TimeSeries::new();
        }
        self.slice(first..last)
    }

    /// Interpolated samples at the midpoints of adjacent pairs; length is
    /// one less than the input.
    ///
    /// This is the alignment primitive of the pipeline: speed samples sit at
    /// mid-revolution timestamps and acceleration samples at mid-speed-pair
    /// timestamps, so midpointing the speed series lines it up with the
    /// acceleration series sample-for-sample.
    pub fn interpolate_midpoints(&self) -> TimeSeries {
        let mut result = TimeSeries::new();
        for idx in 1..self.len() {
            result.append(
                (self.values[idx - 1] + self.values[idx]) / 2.0,
                (self.timestamps[idx - 1] + self.timestamps[idx]) / 2.0,
            );
        }
        result
    }

    /// Time-weighted average over `[start_time, end_time]`, or over the whole
    /// series when a bound is omitted. Each sample is weighted by the
    /// interval to its successor.
    pub fn average_value(
        &self,
        start_time: Option<f64>,
        end_time: Option<f64>,
    ) -> Result<f64, SeriesError> {
        let window = self.time_slice(
            start_time.unwrap_or(f64::NEG_INFINITY),
            end_time.unwrap_or(f64::INFINITY),
        );
        let span = match window.len() {
            0 | 1 => return Err(SeriesError::DegenerateWindow { len: window.len() }),
            n => window.timestamps[n - 1] - window.timestamps[0],
        };
        if span <= 0.0 {
            return Err(SeriesError::DegenerateWindow { len: window.len() });
        }
        let mut weighted_sum = 0.0;
        for idx in 0..window.len() - 1 {
            weighted_sum +=
                window.values[idx] * (window.timestamps[idx + 1] - window.timestamps[idx]);
        }
        Ok(weighted_sum / span)
    }
}

// ============================================================================
// TESTS
// ============================================================================
