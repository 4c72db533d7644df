//! # Command Uplink Module
//!
//! Sends operator commands to the vehicle.
//!
//! Two transports:
//! - A command file the vehicle-side reader (the radio bridge) polls
//! - The open streaming connection
//!
//! Failures are returned to the caller and never retried.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::GroundStationError;

/// Why a command did not go out
#[derive(Debug, Error)]
pub enum UplinkError {
    /// The command failed validation; nothing was written
    #[error("command {0:?} rejected")]
    Rejected(String),

    /// No open channel to carry the command
    #[error("uplink transport is not open")]
    TransportClosed,

    /// Writing the command file failed
    #[error("command file write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<UplinkError> for GroundStationError {
    fn from(err: UplinkError) -> Self {
        match err {
            UplinkError::Rejected(command) => GroundStationError::UplinkRejected(command),
            UplinkError::TransportClosed => GroundStationError::UplinkTransportClosed,
            UplinkError::Io(e) => GroundStationError::Io(e),
        }
    }
}

/// Single-character directives accepted on the validated path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// `C`: start the telemetry stream
    StartStream,
    /// `D`: stop the telemetry stream
    StopStream,
}

impl Directive {
    pub fn as_wire(self) -> &'static str {
        match self {
            Directive::StartStream => "C",
            Directive::StopStream => "D",
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl FromStr for Directive {
    type Err = UplinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "C" => Ok(Directive::StartStream),
            "D" => Ok(Directive::StopStream),
            other => Err(UplinkError::Rejected(other.to_string())),
        }
    }
}

/// Durable command file polled by the vehicle side
#[derive(Debug, Clone)]
pub struct FileUplink {
    path: PathBuf,
}

impl FileUplink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send a directive from the allow-list
    ///
    /// # Errors
    ///
    /// Returns `Rejected` for anything other than `C` or `D`, `Io` if the
    /// command file cannot be written
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cansat_ground::uplink::FileUplink;
    ///
    /// # async fn example() -> Result<(), cansat_ground::uplink::UplinkError> {
    /// let uplink = FileUplink::new("command.txt");
    /// uplink.send("C").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn send(&self, command: &str) -> Result<(), UplinkError> {
        let directive: Directive = command.parse().map_err(|err| {
            warn!("Rejected uplink command {:?}", command);
            err
        })?;
        self.write(directive.as_wire()).await
    }

    /// Send any non-empty command without allow-list validation
    pub async fn send_raw(&self, command: &str) -> Result<(), UplinkError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(UplinkError::Rejected(String::new()));
        }
        self.write(command).await
    }

    async fn write(&self, command: &str) -> Result<(), UplinkError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await?;
        file.write_all(command.as_bytes()).await?;
        file.sync_all().await?;

        info!("Wrote command {:?} to {}", command, self.path.display());
        Ok(())
    }
}

/// Command path over the streaming connection
#[derive(Debug, Clone)]
pub struct StreamUplink {
    open: Arc<AtomicBool>,
    outbound: mpsc::Sender<String>,
}

impl StreamUplink {
    pub fn new(open: Arc<AtomicBool>, outbound: mpsc::Sender<String>) -> Self {
        Self { open, outbound }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queue a command for the socket writer
    ///
    /// Fails immediately with `TransportClosed` when the connection is not
    /// open, instead of holding the command for a later reconnect.
    pub fn send(&self, command: &str) -> Result<(), UplinkError> {
        if !self.is_open() {
            warn!("Not connected, command {:?} not sent", command);
            return Err(UplinkError::TransportClosed);
        }
        self.outbound
            .try_send(command.to_string())
            .map_err(|_| UplinkError::TransportClosed)?;

        info!("Queued command {:?}", command);
        Ok(())
    }
}

/// The uplink currently in use by the station
#[derive(Debug, Clone)]
pub enum UplinkChannel {
    File(FileUplink),
    Stream(StreamUplink),
}

impl UplinkChannel {
    /// Send a command; the file path enforces the directive allow-list
    pub async fn send(&self, command: &str) -> Result<(), UplinkError> {
        match self {
            UplinkChannel::File(uplink) => uplink.send(command).await,
            UplinkChannel::Stream(uplink) => uplink.send(command),
        }
    }

    /// Send a custom command, skipping the allow-list
    pub async fn send_raw(&self, command: &str) -> Result<(), UplinkError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(UplinkError::Rejected(String::new()));
        }
        match self {
            UplinkChannel::File(uplink) => uplink.send_raw(command).await,
            UplinkChannel::Stream(uplink) => uplink.send(command),
        }
    }
}
