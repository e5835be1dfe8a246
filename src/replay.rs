//! Replay of a recorded workout from a raw-ticks CSV.
//!
//! The persisted log format is a single `ticks` column of raw 32-bit
//! counter values, one per pulse, which is everything needed to reproduce a
//! workout bit for bit. Useful for development, debugging, and offline
//! analysis of past workouts.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::warn;

use crate::error::SourceError;
use crate::ingest::PulseIngest;
use crate::traits::{PulseHandler, PulseSource};

/// Column header of the raw-pulse log.
pub const RAW_TICKS_COLUMN_NAME: &str = "ticks";

/// Rows with this tick value are placeholders in old recordings; skipped.
const SENTINEL_TICK: u32 = 0;

/// Inter-sample delay when pacing, roughly one UI frame.
const PACED_SAMPLE_DELAY: Duration = Duration::from_millis(16);

pub struct CsvReplaySource {
    path: PathBuf,
    paced: bool,
    threaded: bool,
    running: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
}

impl CsvReplaySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvReplaySource {
            path: path.into(),
            paced: false,
            threaded: false,
            running: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            reader_thread: None,
        }
    }

    /// Sleep ~16 ms between samples to simulate a live workout.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Run the replay on its own thread instead of blocking `start`.
    pub fn threaded(mut self, threaded: bool) -> Self {
        self.threaded = threaded;
        self
    }

    /// Set once the replay has ended, either by exhausting the file or by
    /// `stop`. Lets a caller running a threaded replay notice completion
    /// without joining.
    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }
}

impl PulseSource for CsvReplaySource {
    fn start(&mut self, mut handler: PulseHandler) -> Result<(), SourceError> {
        if self.reader_thread.is_some() || self.running.load(Ordering::SeqCst) {
            return Err(SourceError::AlreadyStarted);
        }

        let file = File::open(&self.path).map_err(|source| SourceError::ReplayOpen {
            path: self.path.clone(),
            source,
        })?;
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);
        let headers = reader
            .headers()
            .map_err(|source| SourceError::ReplayRead {
                path: self.path.clone(),
                source,
            })?
            .clone();
        let ticks_column = headers
            .iter()
            .position(|header| header == RAW_TICKS_COLUMN_NAME)
            .ok_or(SourceError::MissingTicksColumn {
                path: self.path.clone(),
                column: RAW_TICKS_COLUMN_NAME,
            })?;

        self.running.store(true, Ordering::SeqCst);
        self.finished.store(false, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let finished = Arc::clone(&self.finished);
        let paced = self.paced;

        let mut replay = move || {
            let mut ingest = PulseIngest::new();
            for record in reader.records() {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let record = match record {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("skipping malformed replay row: {}", e);
                        continue;
                    }
                };
                let field = record.get(ticks_column).unwrap_or("");
                let raw_tick: u32 = match field.trim().parse() {
                    Ok(value) => value,
                    Err(_) => {
                        warn!("skipping malformed raw tick {:?}", field);
                        continue;
                    }
                };
                if raw_tick == SENTINEL_TICK {
                    continue;
                }
                handler(ingest.seconds_since_first_pulse(raw_tick), raw_tick);
                if paced {
                    thread::sleep(PACED_SAMPLE_DELAY);
                }
            }
            finished.store(true, Ordering::SeqCst);
        };

        if self.threaded {
            self.reader_thread = Some(thread::spawn(replay));
        } else {
            replay();
            self.running.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
