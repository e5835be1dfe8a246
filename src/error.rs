//! Error types surfaced to callers at startup.
//!
//! Per-pulse arithmetic anomalies are contained inside the pipeline (logged
//! and skipped), and violated alignment invariants between derived time
//! series are programming errors that panic with a diagnostic. Only
//! configuration and pulse-source problems are recoverable, typed errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors loading or validating the workout configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file missing or unreadable
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON, or names an unknown machine type
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The flywheel encoder must produce at least one pulse per revolution
    #[error("num_flywheel_encoder_pulses_per_revolution must be >= 1, got {value}")]
    InvalidPulsesPerRev { value: u32 },

    /// Torque = inertia * acceleration only makes sense for positive inertia
    #[error("flywheel_moment_of_inertia must be positive, got {value}")]
    InvalidInertia { value: f64 },
}

/// Errors starting or running a pulse source
#[derive(Error, Debug)]
pub enum SourceError {
    /// A source can only feed one handler at a time
    #[error("pulse source is already started")]
    AlreadyStarted,

    /// Recorded workout file missing or unreadable
    #[error("failed to open replay file {path:?}: {source}")]
    ReplayOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Replay file exists but has no raw-ticks column
    #[error("replay file {path:?} has no '{column}' column")]
    MissingTicksColumn { path: PathBuf, column: &'static str },

    /// Replay file headers could not be read
    #[error("failed to read replay file {path:?}: {source}")]
    ReplayRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// TCP connection to the pigpio daemon failed
    #[error("failed to connect to pigpio daemon at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The pigpio daemon answered a setup command with an error status
    #[error("pigpio daemon rejected {command}: status {status}")]
    Daemon { command: &'static str, status: i32 },

    /// I/O failure talking to the pigpio daemon
    #[error("I/O error on pigpio connection: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },
}
