//! # Error Types
//!
//! Custom error types for the ground station using `thiserror`.

use thiserror::Error;

/// Main error type for the ground station
#[derive(Debug, Error)]
pub enum GroundStationError {
    /// A line or message did not have the structure its format requires
    #[error("Malformed telemetry: {0}")]
    DecodeMalformed(String),

    /// A field was present but not coercible (non-fatal, sentinel substituted)
    #[error("Telemetry field type error: {0}")]
    DecodeTypeError(String),

    /// The telemetry source could not be read right now; retried next tick
    #[error("Telemetry source unavailable: {0}")]
    SourceUnavailable(String),

    /// The telemetry source refused the connection; terminal until manual reconnect
    #[error("Telemetry source rejected connection: {0}")]
    SourceRejected(String),

    /// Uplink command failed validation
    #[error("Uplink command rejected: {0}")]
    UplinkRejected(String),

    /// Uplink channel is not open
    #[error("Uplink transport is not open")]
    UplinkTransportClosed,

    /// A record cannot be written to the export layout without corrupting it
    #[error("Export rejected: {0}")]
    ExportRejected(String),

    /// Serial radio errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Serial device could not be opened on any candidate path
    #[error("Serial port not found (tried: {0})")]
    SerialPortNotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP errors from the polling transport
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket errors from the streaming transport
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single line or message could not become a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Blank or ignorable line; skipped silently
    #[error("empty line")]
    Empty,

    /// Wrong field count or missing sequence key; dropped and counted
    #[error("malformed: {0}")]
    Malformed(String),
}

impl From<DecodeError> for GroundStationError {
    fn from(err: DecodeError) -> Self {
        GroundStationError::DecodeMalformed(err.to_string())
    }
}

/// Result type alias for the ground station
pub type Result<T> = std::result::Result<T, GroundStationError>;
