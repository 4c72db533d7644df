//! # Telemetry Record Types and Constants
//!
//! Core definitions for one transmitted CanSat sample and the delimited
//! layouts it travels in.

use std::fmt;
use std::str::FromStr;

/// Reserved first field marking an out-of-band event line
pub const EVENT_TAG: &str = "EVENT";

/// Event payload prefix marking a command acknowledgement
pub const CMD_ECHO_PREFIX: &str = "CMD_ECHO:";

/// Team identifier used when the wire format does not carry one
pub const DEFAULT_TEAM_ID: &str = "1000";

/// Columns of the official export layout, in wire order
pub const OFFICIAL_COLUMNS: [&str; 22] = [
    "TEAM_ID",
    "MISSION_TIME",
    "PACKET_COUNT",
    "MODE",
    "STATE",
    "ALTITUDE",
    "TEMPERATURE",
    "PRESSURE",
    "VOLTAGE",
    "CURRENT",
    "GYRO_R",
    "GYRO_P",
    "GYRO_Y",
    "ACCEL_R",
    "ACCEL_P",
    "ACCEL_Y",
    "GPS_TIME",
    "GPS_ALTITUDE",
    "GPS_LATITUDE",
    "GPS_LONGITUDE",
    "GPS_SATS",
    "CMD_ECHO",
];

/// Minimum field count for the official layout (CMD_ECHO may be omitted)
pub const OFFICIAL_MIN_FIELDS: usize = 21;

/// Columns written by the flight computer through the radio bridge
pub const FLIGHT_COMPUTER_COLUMNS: [&str; 19] = [
    "MISSION_TIME",
    "PACKET",
    "STATE",
    "ALTITUDE_M",
    "RAW_ALTITUDE_M",
    "PRESSURE_KPA",
    "TEMP_C",
    "ACCEL_R",
    "ACCEL_P",
    "ACCEL_Y",
    "GYRO_R",
    "GYRO_P",
    "GYRO_Y",
    "GPS_LAT",
    "GPS_LON",
    "GPS_ALT",
    "GPS_TIME_UTC",
    "GPS_SATS",
    "GPS_FIX",
];

/// Minimum field count for the flight computer layout
pub const FLIGHT_COMPUTER_MIN_FIELDS: usize = 19;

/// Error returned when an enumerated field has an unknown value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownValue(pub String);

impl fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value '{}'", self.0)
    }
}

impl std::error::Error for UnknownValue {}

/// Operating mode reported by the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingMode {
    /// Live flight (`F`)
    Flight,
    /// Simulated pressure input (`S`)
    Simulation,
}

impl OperatingMode {
    /// Single-letter wire code
    pub fn as_wire(self) -> &'static str {
        match self {
            OperatingMode::Flight => "F",
            OperatingMode::Simulation => "S",
        }
    }
}

impl FromStr for OperatingMode {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "F" | "FLIGHT" => Ok(OperatingMode::Flight),
            "S" | "SIMULATION" => Ok(OperatingMode::Simulation),
            _ => Err(UnknownValue(s.to_string())),
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Flight state reported by the payload.
///
/// Variants are declared in mission order. Transitions are recorded as
/// received and never validated here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlightState {
    LaunchPad,
    Ascent,
    Apogee,
    Descent,
    ProbeRelease,
    PayloadRelease,
    Landed,
}

impl FlightState {
    /// All states in mission order
    pub const ALL: [FlightState; 7] = [
        FlightState::LaunchPad,
        FlightState::Ascent,
        FlightState::Apogee,
        FlightState::Descent,
        FlightState::ProbeRelease,
        FlightState::PayloadRelease,
        FlightState::Landed,
    ];

    /// Wire spelling (`LAUNCH_PAD`, `ASCENT`, ...)
    pub fn as_wire(self) -> &'static str {
        match self {
            FlightState::LaunchPad => "LAUNCH_PAD",
            FlightState::Ascent => "ASCENT",
            FlightState::Apogee => "APOGEE",
            FlightState::Descent => "DESCENT",
            FlightState::ProbeRelease => "PROBE_RELEASE",
            FlightState::PayloadRelease => "PAYLOAD_RELEASE",
            FlightState::Landed => "LANDED",
        }
    }
}

impl FromStr for FlightState {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        FlightState::ALL
            .into_iter()
            .find(|state| state.as_wire().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownValue(s.to_string()))
    }
}

impl fmt::Display for FlightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Roll/pitch/yaw triple (gyroscope in deg/s, accelerometer in m/s²)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Axes {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl Axes {
    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { roll, pitch, yaw }
    }

    /// All three axes set to the NaN sentinel
    pub fn missing() -> Self {
        Self::new(f64::NAN, f64::NAN, f64::NAN)
    }
}

/// Magnetometer reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// GPS block of a record
#[derive(Debug, Clone, PartialEq)]
pub struct GpsData {
    /// UTC time string as reported by the receiver
    pub time: String,
    /// Altitude above sea level in meters
    pub altitude: f64,
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Satellites tracked, `None` when absent or unparseable
    pub satellites: Option<u32>,
    /// Fix validity flag, `None` when the layout does not carry it
    pub fix: Option<bool>,
}

impl GpsData {
    /// GPS block with every field absent
    pub fn missing() -> Self {
        Self {
            time: String::new(),
            altitude: f64::NAN,
            latitude: f64::NAN,
            longitude: f64::NAN,
            satellites: None,
            fix: None,
        }
    }

    /// Position usable for path and marker rendering.
    ///
    /// Only valid when both latitude and longitude are finite.
    pub fn position(&self) -> Option<GeoPoint> {
        if self.latitude.is_finite() && self.longitude.is_finite() {
            Some(GeoPoint {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        } else {
            None
        }
    }
}

/// A valid latitude/longitude pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// One transmitted telemetry sample.
///
/// Measurements use `f64::NAN` as the sentinel for missing or uncoercible
/// values; counts, enums and flags use `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub team_id: String,
    /// `hh:mm:ss`, monotonic within a session but not across source resets
    pub mission_time: String,
    /// Sole ordering and loss-detection key
    pub packet_count: u64,
    pub mode: Option<OperatingMode>,
    pub state: Option<FlightState>,
    /// Meters, 0.1 m precision
    pub altitude: f64,
    /// °C, 0.1 precision
    pub temperature: f64,
    /// kPa, 0.1 precision
    pub pressure: f64,
    /// Volts, 0.1 precision
    pub voltage: f64,
    /// Amperes, 0.01 precision
    pub current: f64,
    pub gyro: Axes,
    pub accel: Axes,
    pub magnetometer: Option<Vector3>,
    pub gps: GpsData,
    /// Last command the payload acknowledged, may be empty
    pub cmd_echo: String,
}

impl TelemetryRecord {
    /// Record with the given key fields and every measurement absent
    pub fn new(team_id: impl Into<String>, mission_time: impl Into<String>, packet_count: u64) -> Self {
        Self {
            team_id: team_id.into(),
            mission_time: mission_time.into(),
            packet_count,
            mode: None,
            state: None,
            altitude: f64::NAN,
            temperature: f64::NAN,
            pressure: f64::NAN,
            voltage: f64::NAN,
            current: f64::NAN,
            gyro: Axes::missing(),
            accel: Axes::missing(),
            magnetometer: None,
            gps: GpsData::missing(),
            cmd_echo: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flight_state_wire_round_trip() {
        for state in FlightState::ALL {
            assert_eq!(state.as_wire().parse::<FlightState>(), Ok(state));
        }
    }

    #[test]
    fn test_flight_state_is_case_insensitive() {
        assert_eq!("probe_release".parse::<FlightState>(), Ok(FlightState::ProbeRelease));
        assert!("COASTING".parse::<FlightState>().is_err());
    }

    #[test]
    fn test_flight_states_are_ordered() {
        assert!(FlightState::LaunchPad < FlightState::Ascent);
        assert!(FlightState::PayloadRelease < FlightState::Landed);
    }

    #[test]
    fn test_operating_mode_accepts_letter_and_word() {
        assert_eq!("F".parse::<OperatingMode>(), Ok(OperatingMode::Flight));
        assert_eq!("simulation".parse::<OperatingMode>(), Ok(OperatingMode::Simulation));
        assert!("X".parse::<OperatingMode>().is_err());
        assert_eq!(OperatingMode::Simulation.to_string(), "S");
    }

    #[test]
    fn test_gps_position_requires_both_coordinates() {
        let mut gps = GpsData::missing();
        assert_eq!(gps.position(), None);

        gps.latitude = 28.5;
        assert_eq!(gps.position(), None, "Longitude still missing");

        gps.longitude = 77.2;
        let point = gps.position().unwrap();
        assert_eq!(point.latitude, 28.5);
        assert_eq!(point.longitude, 77.2);

        gps.longitude = f64::INFINITY;
        assert_eq!(gps.position(), None, "Infinite coordinates are invalid");
    }

    #[test]
    fn test_column_constants() {
        assert_eq!(OFFICIAL_COLUMNS.len(), 22);
        assert_eq!(OFFICIAL_COLUMNS[2], "PACKET_COUNT");
        assert_eq!(OFFICIAL_COLUMNS[21], "CMD_ECHO");
        assert_eq!(FLIGHT_COMPUTER_COLUMNS.len(), FLIGHT_COMPUTER_MIN_FIELDS);
        assert_eq!(FLIGHT_COMPUTER_COLUMNS[1], "PACKET");
    }
}
