//! # Telemetry Module
//!
//! Wire-level handling of CanSat telemetry.
//!
//! This module handles:
//! - The typed telemetry record and its enumerations
//! - Decoding delimited lines and structured stream messages
//! - Encoding the official export artifact

pub mod record;
pub mod decoder;
pub mod encoder;

pub use decoder::{decode_line, decode_message, CsvLayout, Decoded, DecodedLine, LineEvent, StreamMessage};
pub use record::{FlightState, GeoPoint, OperatingMode, TelemetryRecord};
