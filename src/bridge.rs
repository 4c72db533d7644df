//! # Radio Bridge
//!
//! Relays the XBee radio link into the telemetry text resource and forwards
//! operator commands from the command file to the vehicle.
//!
//! Radio input is one of:
//! - `$<flight computer CSV>*` telemetry frames
//! - Lines starting with `CMD_ECHO:` or containing `EVENT:`
//! - Anything else, logged as informational (startup banners, debug)
//!
//! Telemetry frames are appended to the output file under the flight
//! computer header; events are appended as `EVENT,<HH:MM:SS>,<payload>`.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::error::Elapsed;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{GroundStationError, Result};
use crate::serial::port_trait::RadioPort;
use crate::session::tracker::{SequenceStats, SequenceStep, SequenceTracker};
use crate::telemetry::record::{CMD_ECHO_PREFIX, EVENT_TAG, FLIGHT_COMPUTER_COLUMNS};
use crate::uplink::Directive;

/// Frame delimiters around one telemetry CSV line
const FRAME_START: char = '$';
const FRAME_END: char = '*';

/// Marker of a flight event line from the vehicle
const EVENT_MARKER: &str = "EVENT:";

/// Event payload logged when the bridge shuts down
const SHUTDOWN_EVENT: &str = "COMMAND_SENT: DISCONNECT";

/// One line received over the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioLine {
    /// Frame contents without delimiters, and its packet number
    Telemetry { csv: String, packet: u64 },
    Event(String),
    Info(String),
    Empty,
}

/// Classify one radio line
///
/// # Examples
///
/// ```
/// use cansat_ground::bridge::{classify_radio_line, RadioLine};
///
/// assert_eq!(
///     classify_radio_line("$00:00:05,5,ASCENT*"),
///     RadioLine::Telemetry { csv: "00:00:05,5,ASCENT".to_string(), packet: 5 }
/// );
/// assert_eq!(
///     classify_radio_line("CMD_ECHO:C"),
///     RadioLine::Event("CMD_ECHO:C".to_string())
/// );
/// ```
pub fn classify_radio_line(line: &str) -> RadioLine {
    let line = line.trim();
    if line.is_empty() {
        return RadioLine::Empty;
    }

    if line.starts_with(CMD_ECHO_PREFIX) || line.contains(EVENT_MARKER) {
        return RadioLine::Event(line.to_string());
    }

    let framed = line
        .strip_prefix(FRAME_START)
        .and_then(|rest| rest.strip_suffix(FRAME_END));
    if let Some(csv) = framed {
        let packet = csv.split(',').nth(1).and_then(|p| p.trim().parse::<u64>().ok());
        if let Some(packet) = packet {
            return RadioLine::Telemetry {
                csv: csv.to_string(),
                packet,
            };
        }
    }

    RadioLine::Info(line.to_string())
}

/// Header row written at the top of the output file
pub fn output_header() -> String {
    FLIGHT_COMPUTER_COLUMNS.join(",")
}

/// Bridge settings
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub output_file: PathBuf,
    pub command_file: PathBuf,
    pub read_timeout: Duration,
    pub connect_repeat: u32,
    pub connect_repeat_delay: Duration,
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_file: PathBuf::from(&config.bridge.output_file),
            command_file: config.uplink.command_path(),
            read_timeout: Duration::from_millis(config.bridge.timeout_ms),
            connect_repeat: config.bridge.connect_repeat,
            connect_repeat_delay: Duration::from_millis(config.bridge.connect_repeat_delay_ms),
        }
    }
}

/// Radio-to-file relay
pub struct RadioBridge<P: RadioPort> {
    port: P,
    settings: BridgeSettings,
    tracker: SequenceTracker,
    line_buf: Vec<u8>,
}

impl<P: RadioPort> RadioBridge<P> {
    pub fn new(port: P, settings: BridgeSettings) -> Self {
        Self {
            port,
            settings,
            tracker: SequenceTracker::new(),
            line_buf: Vec::new(),
        }
    }

    pub fn stats(&self) -> SequenceStats {
        self.tracker.stats()
    }

    /// Relay until `shutdown` resolves, then send the stop directive
    ///
    /// The output file is recreated with a fresh header on start.
    ///
    /// # Returns
    ///
    /// * `Result<SequenceStats>` - Received/lost counters for the run
    ///
    /// # Errors
    ///
    /// Returns error if the output file cannot be written or the radio fails
    pub async fn run<F>(&mut self, shutdown: F) -> Result<SequenceStats>
    where
        F: Future<Output = ()>,
    {
        let mut output = File::create(&self.settings.output_file).await?;
        output.write_all(format!("{}\n", output_header()).as_bytes()).await?;
        output.flush().await?;
        info!("Logging to {}", self.settings.output_file.display());

        tokio::pin!(shutdown);
        loop {
            // A consumed command is always forwarded before shutdown is honoured
            if let Some(command) = take_command(&self.settings.command_file).await? {
                self.forward(&command, &mut output).await?;
            }

            let read_timeout = self.settings.read_timeout;
            tokio::select! {
                _ = &mut shutdown => break,
                read = timeout(read_timeout, self.port.read_line_into(&mut self.line_buf)) => {
                    self.on_read(read, &mut output).await?;
                }
            }
        }

        info!("Shutting down...");
        self.port.write_all(b"D\n").await?;
        self.port.flush().await?;
        log_event(&mut output, SHUTDOWN_EVENT).await?;

        let stats = self.tracker.stats();
        info!(
            "Packet loss summary: {} received, {} lost, {} total, {:.2}% loss",
            stats.received,
            stats.lost,
            stats.expected(),
            stats.loss_percent()
        );
        Ok(stats)
    }

    /// Handle the outcome of one bounded radio read
    ///
    /// Bytes of an unfinished line stay in `line_buf` for the next read.
    async fn on_read(&mut self, read: std::result::Result<io::Result<usize>, Elapsed>, output: &mut File) -> Result<()> {
        match read {
            Err(_) => return Ok(()),
            Ok(Err(e)) => return Err(GroundStationError::Serial(format!("Radio read failed: {}", e))),
            Ok(Ok(0)) => return Ok(()),
            Ok(Ok(_)) if !self.line_buf.ends_with(b"\n") => return Ok(()),
            Ok(Ok(_)) => {}
        }

        let line = String::from_utf8_lossy(&self.line_buf).into_owned();
        self.line_buf.clear();
        self.handle_line(&line, output).await
    }

    async fn handle_line(&mut self, line: &str, output: &mut File) -> Result<()> {
        match classify_radio_line(line) {
            RadioLine::Empty => {}
            RadioLine::Event(payload) => log_event(output, &payload).await?,
            RadioLine::Info(text) => info!("{}", text),
            RadioLine::Telemetry { csv, packet } => {
                if let SequenceStep::Gap { lost } = self.tracker.observe(packet) {
                    warn!("Lost {} packet(s)", lost);
                }
                output.write_all(format!("{}\n", csv).as_bytes()).await?;
                output.flush().await?;
                debug!("{} | Loss {:.2}%", csv, self.tracker.stats().loss_percent());
            }
        }
        Ok(())
    }

    /// Send one command to the vehicle
    ///
    /// The start directive is repeated to ride out the flight computer's
    /// startup window; anything else goes out once.
    async fn forward(&mut self, command: &str, output: &mut File) -> Result<()> {
        let repeat = match command.parse::<Directive>() {
            Ok(Directive::StartStream) => self.settings.connect_repeat.max(1),
            _ => 1,
        };

        let frame = format!("{}\n", command);
        for _ in 0..repeat {
            self.port
                .write_all(frame.as_bytes())
                .await
                .map_err(|e| GroundStationError::Serial(format!("Failed to send command: {}", e)))?;
            self.port
                .flush()
                .await
                .map_err(|e| GroundStationError::Serial(format!("Failed to flush serial port: {}", e)))?;
            if repeat > 1 {
                tokio::time::sleep(self.settings.connect_repeat_delay).await;
            }
        }

        log_event(output, &format!("COMMAND_SENT: {}", command)).await
    }
}

/// Read and delete the command file, if present
async fn take_command(path: &Path) -> Result<Option<String>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    tokio::fs::remove_file(path).await?;

    let command = text.trim();
    if command.is_empty() {
        return Ok(None);
    }
    Ok(Some(command.to_string()))
}

async fn log_event(output: &mut File, payload: &str) -> Result<()> {
    let line = format!("{},{},{}\n", EVENT_TAG, Local::now().format("%H:%M:%S"), payload);
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    info!("[EVENT] {}", payload);
    Ok(())
}
