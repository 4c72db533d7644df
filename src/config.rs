//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GroundStationError, Result};
use crate::metrics::BatteryProfile;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub uplink: UplinkConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Session configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Team identifier for layouts that do not carry one
    #[serde(default = "default_team_id")]
    pub team_id: String,
}

/// Which ingestion strategy feeds the session
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Polling,
    Streaming,
}

/// Telemetry source configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,

    /// Telemetry text resource for polling: a file path or an http(s) URL
    #[serde(default = "default_location")]
    pub location: String,

    /// WebSocket endpoint for streaming
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

/// Battery chemistry preset
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatteryPreset {
    SingleCell,
    MultiCell,
    Custom,
}

/// Battery configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BatteryConfig {
    #[serde(default = "default_battery_preset")]
    pub profile: BatteryPreset,

    /// Only used with `profile = "custom"`
    #[serde(default)]
    pub v_min: Option<f64>,

    /// Only used with `profile = "custom"`
    #[serde(default)]
    pub v_max: Option<f64>,
}

/// Uplink configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UplinkConfig {
    /// File the vehicle-side reader polls for directives
    #[serde(default = "default_command_file")]
    pub command_file: String,
}

/// Radio bridge configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_port")]
    pub port: String,

    #[serde(default = "default_bridge_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_bridge_timeout_ms")]
    pub timeout_ms: u64,

    /// Telemetry text resource the bridge appends to
    #[serde(default = "default_location")]
    pub output_file: String,

    #[serde(default = "default_connect_repeat")]
    pub connect_repeat: u32,

    #[serde(default = "default_connect_repeat_delay_ms")]
    pub connect_repeat_delay_ms: u64,
}

/// Export configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; stdout only when empty
    #[serde(default)]
    pub log_dir: String,
}

// Default value functions
fn default_capacity() -> usize { 500 }
fn default_window_size() -> usize { 100 }
fn default_team_id() -> String { "1000".to_string() }

fn default_source_kind() -> SourceKind { SourceKind::Polling }
fn default_location() -> String { "./public/cansat_telemetry.csv".to_string() }
fn default_url() -> String { "ws://localhost:8081".to_string() }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_fetch_timeout_ms() -> u64 { 800 }
fn default_reconnect_backoff_ms() -> u64 { 3000 }

fn default_battery_preset() -> BatteryPreset { BatteryPreset::SingleCell }

fn default_command_file() -> String { "./command.txt".to_string() }

fn default_bridge_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_bridge_baud_rate() -> u32 { 9600 }
fn default_bridge_timeout_ms() -> u64 { 200 }
fn default_connect_repeat() -> u32 { 3 }
fn default_connect_repeat_delay_ms() -> u64 { 300 }

fn default_export_dir() -> String { "./exports".to_string() }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_size: default_window_size(),
            team_id: default_team_id(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            location: default_location(),
            url: default_url(),
            poll_interval_ms: default_poll_interval_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            profile: default_battery_preset(),
            v_min: None,
            v_max: None,
        }
    }
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            command_file: default_command_file(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: default_bridge_port(),
            baud_rate: default_bridge_baud_rate(),
            timeout_ms: default_bridge_timeout_ms(),
            output_file: default_location(),
            connect_repeat: default_connect_repeat(),
            connect_repeat_delay_ms: default_connect_repeat_delay_ms(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
        }
    }
}

impl SourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

impl BatteryConfig {
    /// Resolve the configured preset into a voltage range
    pub fn profile(&self) -> BatteryProfile {
        match self.profile {
            BatteryPreset::SingleCell => BatteryProfile::SINGLE_CELL,
            BatteryPreset::MultiCell => BatteryProfile::MULTI_CELL,
            BatteryPreset::Custom => BatteryProfile::new(
                self.v_min.unwrap_or(f64::NAN),
                self.v_max.unwrap_or(f64::NAN),
            ),
        }
    }
}

impl UplinkConfig {
    pub fn command_path(&self) -> PathBuf {
        PathBuf::from(&self.command_file)
    }
}

fn invalid(message: impl std::fmt::Display) -> GroundStationError {
    GroundStationError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cansat_ground::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Session
        if self.session.capacity == 0 || self.session.capacity > 100_000 {
            return Err(invalid("session capacity must be between 1 and 100000"));
        }

        if self.session.window_size == 0 || self.session.window_size > self.session.capacity {
            return Err(invalid("window_size must be between 1 and the session capacity"));
        }

        if self.session.team_id.is_empty() || self.session.team_id.contains(',') {
            return Err(invalid("team_id must be non-empty and contain no commas"));
        }

        // Source
        match self.source.kind {
            SourceKind::Polling if self.source.location.is_empty() => {
                return Err(invalid("source location cannot be empty for polling"));
            }
            SourceKind::Streaming
                if !(self.source.url.starts_with("ws://") || self.source.url.starts_with("wss://")) =>
            {
                return Err(invalid("source url must start with ws:// or wss://"));
            }
            _ => {}
        }

        if self.source.poll_interval_ms == 0 || self.source.poll_interval_ms > 60000 {
            return Err(invalid("poll_interval_ms must be between 1 and 60000"));
        }

        if self.source.fetch_timeout_ms == 0 || self.source.fetch_timeout_ms > self.source.poll_interval_ms {
            return Err(invalid("fetch_timeout_ms must be between 1 and poll_interval_ms"));
        }

        if self.source.reconnect_backoff_ms == 0 || self.source.reconnect_backoff_ms > 60000 {
            return Err(invalid("reconnect_backoff_ms must be between 1 and 60000"));
        }

        // Battery
        if self.battery.profile == BatteryPreset::Custom
            && (self.battery.v_min.is_none() || self.battery.v_max.is_none())
        {
            return Err(invalid("custom battery profile requires v_min and v_max"));
        }

        let profile = self.battery.profile();
        if !(profile.v_min.is_finite() && profile.v_max.is_finite() && profile.v_min < profile.v_max) {
            return Err(invalid("battery v_min must be less than v_max"));
        }

        // Uplink
        if self.uplink.command_file.is_empty() {
            return Err(invalid("uplink command_file cannot be empty"));
        }

        // Bridge
        if self.bridge.port.is_empty() {
            return Err(invalid("bridge port cannot be empty"));
        }

        if ![1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200].contains(&self.bridge.baud_rate) {
            return Err(invalid(
                "bridge baud_rate must be one of: 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200",
            ));
        }

        if self.bridge.timeout_ms == 0 || self.bridge.timeout_ms > 10000 {
            return Err(invalid("bridge timeout_ms must be between 1 and 10000"));
        }

        if self.bridge.output_file.is_empty() {
            return Err(invalid("bridge output_file cannot be empty"));
        }

        if self.bridge.connect_repeat == 0 || self.bridge.connect_repeat > 10 {
            return Err(invalid("connect_repeat must be between 1 and 10"));
        }

        if self.bridge.connect_repeat_delay_ms > 5000 {
            return Err(invalid("connect_repeat_delay_ms must be at most 5000"));
        }

        // Export
        if self.export.dir.is_empty() {
            return Err(invalid("export dir cannot be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_default_config() {
        assert!(create_valid_config().validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[session]
capacity = 200
window_size = 50

[source]
kind = "streaming"
url = "ws://groundstation.local:8081"

[battery]
profile = "multi_cell"

[uplink]

[bridge]
port = "/dev/ttyUSB1"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.session.capacity, 200);
        assert_eq!(config.source.kind, SourceKind::Streaming);
        assert_eq!(config.battery.profile(), BatteryProfile::MULTI_CELL);
        assert_eq!(config.bridge.port, "/dev/ttyUSB1");
        assert_eq!(config.bridge.baud_rate, 9600);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.session.capacity, 500);
        assert_eq!(config.source.kind, SourceKind::Polling);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/cansat.toml");
        assert!(matches!(result, Err(GroundStationError::Io(_))));
    }

    #[test]
    fn test_unknown_source_kind() {
        let result = Config::from_toml("[source]\nkind = \"carrier_pigeon\"\n");
        assert!(matches!(result, Err(GroundStationError::Config(_))));
    }

    #[test]
    fn test_capacity_zero() {
        let mut config = create_valid_config();
        config.session.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_window_larger_than_capacity() {
        let mut config = create_valid_config();
        config.session.capacity = 50;
        config.session.window_size = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_team_id_with_comma() {
        let mut config = create_valid_config();
        config.session.team_id = "10,00".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_streaming_requires_ws_url() {
        let mut config = create_valid_config();
        config.source.kind = SourceKind::Streaming;
        config.source.url = "http://localhost:8081".to_string();
        assert!(config.validate().is_err());

        config.source.url = "wss://localhost:8081".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_polling_requires_location() {
        let mut config = create_valid_config();
        config.source.location = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_interval_zero() {
        let mut config = create_valid_config();
        config.source.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fetch_timeout_longer_than_interval() {
        let mut config = create_valid_config();
        config.source.fetch_timeout_ms = config.source.poll_interval_ms + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconnect_backoff_too_high() {
        let mut config = create_valid_config();
        config.source.reconnect_backoff_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_custom_battery_profile() {
        let mut config = create_valid_config();
        config.battery.profile = BatteryPreset::Custom;
        assert!(config.validate().is_err(), "Custom profile needs both bounds");

        config.battery.v_min = Some(3.3);
        config.battery.v_max = Some(4.2);
        assert!(config.validate().is_ok());
        assert_eq!(config.battery.profile(), BatteryProfile::new(3.3, 4.2));

        config.battery.v_max = Some(3.0);
        assert!(config.validate().is_err(), "v_min must be below v_max");
    }

    #[test]
    fn test_invalid_bridge_baud_rate() {
        let mut config = create_valid_config();
        config.bridge.baud_rate = 420000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connect_repeat_zero() {
        let mut config = create_valid_config();
        config.bridge.connect_repeat = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_command_file() {
        let mut config = create_valid_config();
        config.uplink.command_file = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let config = create_valid_config();
        assert_eq!(config.source.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.source.reconnect_backoff(), Duration::from_secs(3));
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_capacity(), 500);
        assert_eq!(default_window_size(), 100);
        assert_eq!(default_team_id(), "1000");
        assert_eq!(default_poll_interval_ms(), 1000);
        assert_eq!(default_reconnect_backoff_ms(), 3000);
        assert_eq!(default_bridge_baud_rate(), 9600);
        assert_eq!(default_connect_repeat(), 3);
        assert_eq!(default_connect_repeat_delay_ms(), 300);
        assert_eq!(default_command_file(), "./command.txt");
    }
}
