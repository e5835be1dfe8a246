//! Raw hardware tick normalization.
//!
//! The Raspberry Pi reports pulse times as a 32-bit microsecond counter that
//! wraps every ~71.6 minutes. This module converts that counter into
//! monotonic seconds since the first observed pulse, which is the time base
//! every derived series uses.

/// One wrap of the 32-bit microsecond counter.
const TICK_COUNTER_MODULUS: i64 = 1 << 32;
const TICK_PERIOD_SECONDS: f64 = 1e-6;

/// Tracks counter rollovers and the first observed tick.
#[derive(Debug, Default)]
pub struct PulseIngest {
    first_tick: Option<u32>,
    last_tick: Option<u32>,
    rollover_count: i64,
}

impl PulseIngest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a raw tick to seconds since the first pulse.
    ///
    /// Output is non-decreasing as long as the true inter-arrival time of
    /// pulses stays under one counter wrap. Glitch suppression is the pulse
    /// source's job; by the time a tick reaches this point it is trusted.
    pub fn seconds_since_first_pulse(&mut self, raw_tick: u32) -> f64 {
        let first = *self.first_tick.get_or_insert(raw_tick);
        if let Some(last) = self.last_tick {
            if raw_tick < last {
                self.rollover_count += 1;
            }
        }
        self.last_tick = Some(raw_tick);
        let adjusted_ticks =
            i64::from(raw_tick) - i64::from(first) + self.rollover_count * TICK_COUNTER_MODULUS;
        adjusted_ticks as f64 * TICK_PERIOD_SECONDS
    }
}
