//! # Serial Communication Module
//!
//! Handles the XBee radio link to the flight computer.
//!
//! This module handles:
//! - Opening the serial port at 9600 baud 8N1
//! - Line-oriented async reads of telemetry frames and event lines
//! - Writing single-line directives to the vehicle

pub mod port_trait;

use crate::error::{GroundStationError, Result};
use async_trait::async_trait;
use port_trait::{RadioPort, StreamPort};
use std::io;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// XBee default baud rate
pub const XBEE_BAUD_RATE: u32 = 9600;

/// XBee radio on a USB serial adapter
pub struct XbeeRadio {
    link: StreamPort<tokio_serial::SerialStream>,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
}

impl std::fmt::Debug for XbeeRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XbeeRadio")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl XbeeRadio {
    /// Open the radio on the configured device
    ///
    /// # Arguments
    ///
    /// * `path` - Device path (e.g., "/dev/ttyUSB0" or "COM3")
    /// * `baud_rate` - Radio baud rate, normally [`XBEE_BAUD_RATE`]
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cansat_ground::serial::{XbeeRadio, XBEE_BAUD_RATE};
    ///
    /// let radio = XbeeRadio::open("/dev/ttyUSB0", XBEE_BAUD_RATE)?;
    /// println!("Connected to: {}", radio.device_path());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        Self::open_with_paths(&[path], baud_rate)
    }

    /// Open the first device path that works
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try, in order
    /// * `baud_rate` - Radio baud rate
    ///
    /// # Returns
    ///
    /// * `Result<XbeeRadio>` - Connected radio or error
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Connected to {} @ {}", path, baud_rate);
                    return Ok(Self {
                        link: StreamPort::new(port),
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(GroundStationError::SerialPortNotFound(paths.join(", ")))
    }

    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| GroundStationError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[async_trait]
impl RadioPort for XbeeRadio {
    async fn read_line_into(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        self.link.read_line_into(buf).await
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.link.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.link.flush().await
    }
}
