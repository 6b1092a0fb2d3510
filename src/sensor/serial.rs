//! Serial line reader for the turbidity sensor.
//!
//! The device prints free-form ASCII lines; only lines carrying the
//! `Turbidity:` tag update the shared store. Everything else is skipped, and
//! no single bad line or transient I/O failure stops the loop.

use crate::error::{Result, SystemError};
use crate::sensor::{store::ReadingStore, TURBIDITY_MARKER};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Pause after a hard read error so an unplugged device doesn't spin the thread.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Process-wide guard so the reader starts at most once.
static READER_STARTED: AtomicBool = AtomicBool::new(false);

/// Serial connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port identifier (e.g. "COM10", "/dev/ttyACM0")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Timeout for a single read attempt in milliseconds
    pub timeout_ms: u64,
    /// Whether the reader should be started at all
    pub enabled: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port().to_string(),
            baud_rate: crate::DEFAULT_BAUD_RATE,
            timeout_ms: crate::DEFAULT_SERIAL_TIMEOUT_MS,
            enabled: true,
        }
    }
}

impl SerialConfig {
    /// Create a serial configuration for the given port and baud rate.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the per-read timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Enable or disable the reader.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Per-read timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Platform default for the sensor's port name.
pub fn default_port() -> &'static str {
    if cfg!(windows) {
        "COM10"
    } else {
        "/dev/ttyACM0"
    }
}

/// Classification of a single line received from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// A finite turbidity value was parsed.
    Reading(f64),
    /// The line does not carry the turbidity marker.
    NoMarker,
    /// The marker was present but the payload is unusable.
    Malformed(String),
}

/// Classify one line of device output.
///
/// The payload is the first token after the marker, delimited by whitespace,
/// `,`, `;` or another `:`.
pub fn parse_line(line: &str) -> LineOutcome {
    let Some(start) = line.find(TURBIDITY_MARKER) else {
        return LineOutcome::NoMarker;
    };

    let payload = line[start + TURBIDITY_MARKER.len()..]
        .trim_start()
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':'))
        .next()
        .unwrap_or_default();

    if payload.is_empty() {
        return LineOutcome::Malformed("empty payload".to_string());
    }

    match payload.parse::<f64>() {
        Ok(value) if value.is_finite() => LineOutcome::Reading(value),
        Ok(value) => LineOutcome::Malformed(format!("non-finite value {}", value)),
        Err(e) => LineOutcome::Malformed(format!("invalid number {:?}: {}", payload, e)),
    }
}

/// Reads lines from a source and publishes turbidity values into the store.
pub struct SerialReader<R> {
    source: R,
    store: Arc<ReadingStore>,
}

impl SerialReader<BufReader<Box<dyn serialport::SerialPort>>> {
    /// Open the configured serial port.
    pub fn open(config: &SerialConfig, store: Arc<ReadingStore>) -> Result<Self> {
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(config.timeout())
            .open()
            .map_err(|e| {
                SystemError::serial_error(format!("Failed to open {}: {}", config.port, e))
            })?;

        info!(
            "Opened serial port {} at {} baud",
            config.port, config.baud_rate
        );
        Ok(Self::new(BufReader::new(port), store))
    }
}

impl<R: BufRead> SerialReader<R> {
    /// Create a reader over any line source.
    pub fn new(source: R, store: Arc<ReadingStore>) -> Self {
        Self { source, store }
    }

    /// Classify a line and publish it if it carries a reading.
    pub fn process_line(&self, line: &str) -> LineOutcome {
        let outcome = parse_line(line);
        match &outcome {
            LineOutcome::Reading(value) => {
                self.store.write(*value);
                debug!("Turbidity: {}", value);
            }
            LineOutcome::NoMarker => trace!("Ignoring serial line: {:?}", line),
            LineOutcome::Malformed(reason) => {
                warn!("Malformed turbidity line {:?}: {}", line, reason)
            }
        }
        outcome
    }

    /// Run the read loop until cancelled or the source is exhausted.
    pub fn run(mut self, cancel: CancellationToken) {
        let mut buf = Vec::new();

        while !cancel.is_cancelled() {
            match self.source.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    info!("Serial source closed, stopping reader");
                    break;
                }
                Ok(_) => {
                    match std::str::from_utf8(&buf) {
                        Ok(line) => {
                            let line = line.trim();
                            if !line.is_empty() {
                                self.process_line(line);
                            }
                        }
                        Err(e) => warn!("Serial decode error: {}", e),
                    }
                    buf.clear();
                }
                // A partial line stays in `buf` and is completed by the next read.
                Err(e) if is_timeout(&e) => trace!("Serial read timed out"),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("Serial error: {}", e);
                    buf.clear();
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }

        debug!("Serial reader loop exited");
    }
}

impl<R: BufRead + Send + 'static> SerialReader<R> {
    /// Run the read loop on a dedicated thread.
    pub fn spawn(self, cancel: CancellationToken) -> Result<SerialReaderHandle> {
        let token = cancel.clone();
        let thread = thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || self.run(token))?;

        Ok(SerialReaderHandle {
            cancel,
            thread: Some(thread),
        })
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Handle to a running reader thread.
pub struct SerialReaderHandle {
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl SerialReaderHandle {
    /// Whether the reader thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Cancel the reader and wait for its thread to exit.
    ///
    /// Returns once the in-flight read attempt times out.
    pub fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Serial reader thread panicked");
            }
        }
    }
}

/// Open the configured port and start the reader, at most once per process.
///
/// Returns `Ok(None)` when serial reading is disabled. An open failure is
/// returned to the caller, which is expected to log it and keep serving.
pub fn start_serial_reader(
    config: &SerialConfig,
    store: Arc<ReadingStore>,
    cancel: CancellationToken,
) -> Result<Option<SerialReaderHandle>> {
    if !config.enabled {
        info!("Serial reading disabled");
        return Ok(None);
    }

    let handle = start_reader_once(
        &READER_STARTED,
        || SerialReader::open(config, store),
        cancel,
    )?;

    info!("Serial thread started");
    Ok(Some(handle))
}

/// Claim `started`, then open and spawn a reader.
///
/// A second claim fails with `AlreadyRunning`. A failed open or spawn
/// releases the claim so a later start can retry.
fn start_reader_once<R, F>(
    started: &AtomicBool,
    open: F,
    cancel: CancellationToken,
) -> Result<SerialReaderHandle>
where
    R: BufRead + Send + 'static,
    F: FnOnce() -> Result<SerialReader<R>>,
{
    if started.swap(true, Ordering::SeqCst) {
        return Err(SystemError::AlreadyRunning("serial reader"));
    }

    open().and_then(|reader| reader.spawn(cancel)).map_err(|e| {
        started.store(false, Ordering::SeqCst);
        e
    })
}
