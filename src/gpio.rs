//! Live pulse source: TCP client to a pigpio daemon.
//!
//! The flywheel sensor hangs off a Raspberry Pi GPIO pin watched by pigpiod.
//! The client opens two sockets: a control socket for setup commands and a
//! notification socket that streams 12-byte level-change reports. The
//! infrared sensor output goes low when a flywheel hole passes in front of
//! it, so pulses are falling edges of the pin's level bit.
//!
//! Wire format (little-endian): commands are four u32 words
//! `(cmd, p1, p2, p3)` answered by an echo whose last word is the result;
//! reports are `(seqno: u16, flags: u16, tick: u32, level: u32)` where
//! `tick` is the daemon's 32-bit microsecond counter.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use log::{error, info, warn};

use crate::config::Config;
use crate::error::SourceError;
use crate::ingest::PulseIngest;
use crate::traits::{PulseHandler, PulseSource};

// pigpio command codes
const PI_CMD_MODES: u32 = 0;
const PI_CMD_NB: u32 = 19;
const PI_CMD_NC: u32 = 21;
const PI_CMD_FG: u32 = 97;
const PI_CMD_NOIB: u32 = 99;

const PI_INPUT: u32 = 0;

/// Reports with any of these flags are not level changes (watchdog
/// timeouts, keep-alives, event notifications) and carry no edge.
const PI_NTFY_FLAGS_MASK: u16 = 0xffe0;

const REPORT_SIZE: usize = 12;

/// How long the listener blocks on the notification socket before checking
/// the run flag again.
const LISTENER_READ_TIMEOUT: Duration = Duration::from_millis(500);

pub struct PiGpioSource {
    address: String,
    pin: u8,
    glitch_filter_us: u32,

    control: Option<TcpStream>,
    notify_handle: Option<u32>,
    running: Arc<AtomicBool>,
    listener_thread: Option<JoinHandle<()>>,
}

impl PiGpioSource {
    pub fn from_config(config: &Config) -> Self {
        PiGpioSource::new(
            &config.ip_address,
            config.pigpio_daemon_port,
            config.gpio_pin_number,
            config.glitch_filter_us,
        )
    }

    pub fn new(host: &str, port: u16, pin: u8, glitch_filter_us: u32) -> Self {
        PiGpioSource {
            address: format!("{}:{}", host, port),
            pin,
            glitch_filter_us,
            control: None,
            notify_handle: None,
            running: Arc::new(AtomicBool::new(false)),
            listener_thread: None,
        }
    }

    fn connect(&self) -> Result<TcpStream, SourceError> {
        TcpStream::connect(&self.address).map_err(|source| SourceError::Connect {
            address: self.address.clone(),
            source,
        })
    }
}

/// Send one command word sequence and return the daemon's result word.
fn send_command(
    stream: &mut TcpStream,
    command: u32,
    p1: u32,
    p2: u32,
) -> Result<i32, SourceError> {
    let mut request = [0u8; 16];
    LittleEndian::write_u32(&mut request[0..4], command);
    LittleEndian::write_u32(&mut request[4..8], p1);
    LittleEndian::write_u32(&mut request[8..12], p2);
    // Fourth word is the extension length; none of our commands carry one
    stream
        .write_all(&request)
        .map_err(|source| SourceError::Io { source })?;

    let mut reply = [0u8; 16];
    stream
        .read_exact(&mut reply)
        .map_err(|source| SourceError::Io { source })?;
    Ok(LittleEndian::read_u32(&reply[12..16]) as i32)
}

fn check_status(command: &'static str, status: i32) -> Result<i32, SourceError> {
    if status < 0 {
        return Err(SourceError::Daemon { command, status });
    }
    Ok(status)
}

impl PulseSource for PiGpioSource {
    fn start(&mut self, mut handler: PulseHandler) -> Result<(), SourceError> {
        if self.listener_thread.is_some() {
            return Err(SourceError::AlreadyStarted);
        }

        let mut control = self.connect()?;
        let mut notifications = self.connect()?;
        notifications
            .set_read_timeout(Some(LISTENER_READ_TIMEOUT))
            .map_err(|source| SourceError::Io { source })?;

        let pin = u32::from(self.pin);
        check_status(
            "MODES",
            send_command(&mut control, PI_CMD_MODES, pin, PI_INPUT)?,
        )?;
        check_status(
            "FG",
            send_command(&mut control, PI_CMD_FG, pin, self.glitch_filter_us)?,
        )?;
        // NOIB turns the second socket into a notification stream and
        // returns the handle NB/NC refer to
        let handle = check_status(
            "NOIB",
            send_command(&mut notifications, PI_CMD_NOIB, 0, 0)?,
        )? as u32;
        check_status(
            "NB",
            send_command(&mut control, PI_CMD_NB, handle, 1 << pin)?,
        )?;
        info!(
            "watching GPIO {} via pigpio daemon at {} (glitch filter {} us)",
            self.pin, self.address, self.glitch_filter_us
        );

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let pin_bit: u32 = 1 << pin;

        let listener = thread::spawn(move || {
            let mut ingest = PulseIngest::new();
            let mut last_level: Option<u32> = None;
            // Reports may straddle TCP segment boundaries; buffer and process
            // whole 12-byte frames only
            let mut pending: Vec<u8> = Vec::with_capacity(4 * REPORT_SIZE);
            let mut chunk = [0u8; 512];

            while running.load(Ordering::SeqCst) {
                let read = match notifications.read(&mut chunk) {
                    Ok(0) => {
                        if running.load(Ordering::SeqCst) {
                            error!("pigpio notification stream closed");
                        }
                        break;
                    }
                    Ok(read) => read,
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    Err(e) => {
                        if running.load(Ordering::SeqCst) {
                            error!("pigpio notification stream ended: {}", e);
                        }
                        break;
                    }
                };
                pending.extend_from_slice(&chunk[..read]);

                let mut consumed = 0;
                while pending.len() - consumed >= REPORT_SIZE {
                    let report = &pending[consumed..consumed + REPORT_SIZE];
                    consumed += REPORT_SIZE;

                    let flags = LittleEndian::read_u16(&report[2..4]);
                    let tick = LittleEndian::read_u32(&report[4..8]);
                    let level = LittleEndian::read_u32(&report[8..12]);

                    if flags & PI_NTFY_FLAGS_MASK != 0 {
                        continue;
                    }
                    let falling_edge = match last_level {
                        Some(last) => last & pin_bit != 0 && level & pin_bit == 0,
                        // First report only establishes the baseline level
                        None => false,
                    };
                    last_level = Some(level);
                    if falling_edge {
                        handler(ingest.seconds_since_first_pulse(tick), tick);
                    }
                }
                pending.drain(..consumed);
            }
        });

        self.control = Some(control);
        self.notify_handle = Some(handle);
        self.listener_thread = Some(listener);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(mut control) = self.control.take() {
            if let Some(handle) = self.notify_handle.take() {
                // Bounded wait for the reply; the daemon may already be gone
                let _ = control.set_read_timeout(Some(LISTENER_READ_TIMEOUT));
                if let Err(e) = send_command(&mut control, PI_CMD_NC, handle, 0) {
                    warn!("failed to close pigpio notification handle: {}", e);
                }
            }
            let _ = control.shutdown(Shutdown::Both);
        }
        if let Some(listener) = self.listener_thread.take() {
            let _ = listener.join();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
