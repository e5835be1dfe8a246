use anyhow::Result;

use crate::error::SourceError;
use crate::workout::WorkoutCore;

/// Called once per flywheel pulse with (seconds since first pulse, raw tick).
pub type PulseHandler = Box<dyn FnMut(f64, u32) + Send>;

#[cfg_attr(test, mockall::automock)]
pub trait PulseSource {
    /// Begin invoking the handler once per pulse. Invocations come from the
    /// source's own thread and cease after `stop` returns.
    fn start(&mut self, handler: PulseHandler) -> Result<(), SourceError>;

    fn stop(&mut self);
}

#[cfg_attr(test, mockall::automock)]
pub trait WorkoutObserver: Send {
    /// Notified exactly once after every fully-processed pulse. Errors are
    /// logged by the tracker and do not halt the pipeline.
    fn updated(&mut self, workout: &WorkoutCore) -> Result<()>;
}
