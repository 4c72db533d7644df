//! # Telemetry Record Decoder
//!
//! Decodes one delimited telemetry line or one structured stream message
//! into a [`TelemetryRecord`]. Pure functions, no state.
//!
//! A field that is present but not coercible is replaced by its sentinel and
//! reported in [`Decoded::type_errors`]; only a structurally truncated line
//! (or one without a usable packet count) is rejected.

use serde_json::{Map, Value};

use super::record::*;
use crate::error::DecodeError;

/// Delimited layout of a telemetry text resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvLayout {
    /// 22-column export layout starting with `TEAM_ID`
    Official,
    /// 19-column layout written by the flight computer
    FlightComputer,
}

impl CsvLayout {
    /// Select the layout from a header row
    pub fn from_header(header: &str) -> Self {
        let first = header.split(',').next().unwrap_or("").trim();
        if first.eq_ignore_ascii_case(OFFICIAL_COLUMNS[0]) {
            CsvLayout::Official
        } else {
            CsvLayout::FlightComputer
        }
    }

    /// Fewest fields a telemetry line of this layout may have
    pub fn min_fields(self) -> usize {
        match self {
            CsvLayout::Official => OFFICIAL_MIN_FIELDS,
            CsvLayout::FlightComputer => FLIGHT_COMPUTER_MIN_FIELDS,
        }
    }
}

/// A record plus the names of fields that were sentinel-substituted
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub record: TelemetryRecord,
    pub type_errors: Vec<&'static str>,
}

/// Out-of-band event carried on an `EVENT` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Command acknowledgement, payload with the `CMD_ECHO:` prefix removed
    CommandEcho(String),
    /// Any other flight event (APOGEE, LANDED, COMMAND_SENT: C, ...)
    Flight(String),
}

/// Result of decoding one delimited line
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedLine {
    Record(Decoded),
    Event(LineEvent),
}

/// Result of decoding one structured stream message
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Handshake sent by the server on connect
    Connected { mission_time: Option<u64> },
    /// One full telemetry record
    Telemetry(Decoded),
    /// Envelope type this layer does not consume
    Ignored(String),
}

/// Classify an event payload
pub fn classify_event(payload: &str) -> LineEvent {
    let payload = payload.trim();
    match payload.strip_prefix(CMD_ECHO_PREFIX) {
        Some(echo) => LineEvent::CommandEcho(echo.trim().to_string()),
        None => LineEvent::Flight(payload.to_string()),
    }
}

/// Decode one delimited telemetry line
///
/// # Arguments
///
/// * `line` - Raw line, with or without trailing newline
/// * `layout` - Layout announced by the resource header
/// * `team_id` - Team identifier for layouts that do not carry one
///
/// # Returns
///
/// * `Result<DecodedLine, DecodeError>` - Record or event, or why the line was dropped
///
/// # Errors
///
/// Returns error if:
/// - The line is blank (`Empty`)
/// - The line has fewer fields than the layout requires (`Malformed`)
/// - The packet count is missing or not a non-negative integer (`Malformed`)
pub fn decode_line(line: &str, layout: CsvLayout, team_id: &str) -> Result<DecodedLine, DecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(DecodeError::Empty);
    }

    let raw: Vec<&str> = line.split(',').collect();
    let fields: Vec<&str> = raw.iter().map(|f| f.trim()).collect();

    if fields[0] == EVENT_TAG {
        if fields.len() < 3 {
            return Err(DecodeError::Malformed(format!(
                "event line has {} fields, expected at least 3",
                fields.len()
            )));
        }
        return Ok(DecodedLine::Event(classify_event(&raw[2..].join(","))));
    }

    if fields.len() < layout.min_fields() {
        return Err(DecodeError::Malformed(format!(
            "expected at least {} fields, got {}",
            layout.min_fields(),
            fields.len()
        )));
    }

    let decoded = match layout {
        CsvLayout::Official => decode_official(&fields, &raw)?,
        CsvLayout::FlightComputer => decode_flight_computer(&fields, team_id)?,
    };
    Ok(DecodedLine::Record(decoded))
}

/// `raw` holds the untrimmed fields; the echo tail is taken from them verbatim
fn decode_official(fields: &[&str], raw: &[&str]) -> Result<Decoded, DecodeError> {
    let mut r = FieldReader::default();
    let mut record = TelemetryRecord::new(fields[0], fields[1], parse_packet_count(fields[2])?);

    record.mode = r.parsed(fields[3], "MODE");
    record.state = r.parsed(fields[4], "STATE");
    record.altitude = r.measurement(fields[5], "ALTITUDE");
    record.temperature = r.measurement(fields[6], "TEMPERATURE");
    record.pressure = r.measurement(fields[7], "PRESSURE");
    record.voltage = r.measurement(fields[8], "VOLTAGE");
    record.current = r.measurement(fields[9], "CURRENT");
    record.gyro = Axes::new(
        r.measurement(fields[10], "GYRO_R"),
        r.measurement(fields[11], "GYRO_P"),
        r.measurement(fields[12], "GYRO_Y"),
    );
    record.accel = Axes::new(
        r.measurement(fields[13], "ACCEL_R"),
        r.measurement(fields[14], "ACCEL_P"),
        r.measurement(fields[15], "ACCEL_Y"),
    );
    record.gps = GpsData {
        time: fields[16].to_string(),
        altitude: r.measurement(fields[17], "GPS_ALTITUDE"),
        latitude: r.measurement(fields[18], "GPS_LATITUDE"),
        longitude: r.measurement(fields[19], "GPS_LONGITUDE"),
        satellites: r.parsed(fields[20], "GPS_SATS"),
        fix: None,
    };
    // CMD_ECHO is the tail and may itself contain commas
    record.cmd_echo = raw
        .get(21..)
        .map(|rest| rest.join(",").trim().to_string())
        .unwrap_or_default();

    Ok(r.finish(record))
}

fn decode_flight_computer(fields: &[&str], team_id: &str) -> Result<Decoded, DecodeError> {
    let mut r = FieldReader::default();
    let mut record = TelemetryRecord::new(team_id, fields[0], parse_packet_count(fields[1])?);

    record.mode = Some(OperatingMode::Flight);
    record.state = r.parsed(fields[2], "STATE");
    record.altitude = r.measurement(fields[3], "ALTITUDE_M");
    record.pressure = r.measurement(fields[5], "PRESSURE_KPA");
    record.temperature = r.measurement(fields[6], "TEMP_C");
    record.accel = Axes::new(
        r.measurement(fields[7], "ACCEL_R"),
        r.measurement(fields[8], "ACCEL_P"),
        r.measurement(fields[9], "ACCEL_Y"),
    );
    record.gyro = Axes::new(
        r.measurement(fields[10], "GYRO_R"),
        r.measurement(fields[11], "GYRO_P"),
        r.measurement(fields[12], "GYRO_Y"),
    );
    record.gps = GpsData {
        time: fields[16].to_string(),
        altitude: r.measurement(fields[15], "GPS_ALT"),
        latitude: r.measurement(fields[13], "GPS_LAT"),
        longitude: r.measurement(fields[14], "GPS_LON"),
        satellites: r.parsed(fields[17], "GPS_SATS"),
        fix: r.fix_flag(fields[18], "GPS_FIX"),
    };

    Ok(r.finish(record))
}

fn parse_packet_count(field: &str) -> Result<u64, DecodeError> {
    field
        .trim()
        .parse::<u64>()
        .map_err(|_| DecodeError::Malformed(format!("invalid packet count '{}'", field)))
}

/// Collects sentinel substitutions while reading the fields of one record
#[derive(Default)]
struct FieldReader {
    type_errors: Vec<&'static str>,
}

impl FieldReader {
    /// Empty and `NaN` are the sentinel itself; anything else unparseable or
    /// non-finite is a type error.
    fn measurement(&mut self, raw: &str, name: &'static str) -> f64 {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
            return f64::NAN;
        }
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => value,
            _ => {
                self.type_errors.push(name);
                f64::NAN
            }
        }
    }

    fn parsed<T: std::str::FromStr>(&mut self, raw: &str, name: &'static str) -> Option<T> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                self.type_errors.push(name);
                None
            }
        }
    }

    fn fix_flag(&mut self, raw: &str, name: &'static str) -> Option<bool> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "" => None,
            "1" | "FIX" | "TRUE" => Some(true),
            "0" | "NO_FIX" | "FALSE" => Some(false),
            _ => {
                self.type_errors.push(name);
                None
            }
        }
    }

    fn finish(self, record: TelemetryRecord) -> Decoded {
        Decoded {
            record,
            type_errors: self.type_errors,
        }
    }
}

/// Decode one structured stream message
///
/// Envelopes are JSON objects with a `type` discriminator. `telemetry`
/// envelopes carry one record under `data`, keyed by the official column
/// names.
///
/// # Errors
///
/// Returns `Malformed` if the text is not a JSON object with a string
/// `type`, or a `telemetry` envelope lacks a usable `data.PACKET_COUNT`.
pub fn decode_message(text: &str) -> Result<StreamMessage, DecodeError> {
    if text.trim().is_empty() {
        return Err(DecodeError::Empty);
    }

    let value: Value = serde_json::from_str(text)
        .map_err(|e| DecodeError::Malformed(format!("invalid JSON: {}", e)))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::Malformed("missing message type".to_string()))?;

    match kind {
        "connected" => Ok(StreamMessage::Connected {
            mission_time: value.get("missionTime").and_then(Value::as_u64),
        }),
        "telemetry" => {
            let data = value
                .get("data")
                .and_then(Value::as_object)
                .ok_or_else(|| DecodeError::Malformed("telemetry message without data".to_string()))?;
            decode_json_record(data).map(StreamMessage::Telemetry)
        }
        other => Ok(StreamMessage::Ignored(other.to_string())),
    }
}

/// Decode a record object keyed by the official column names
pub fn decode_json_record(data: &Map<String, Value>) -> Result<Decoded, DecodeError> {
    let packet_count = match data.get("PACKET_COUNT") {
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| DecodeError::Malformed(format!("invalid packet count {}", n)))?,
        Some(Value::String(s)) => parse_packet_count(s)?,
        _ => return Err(DecodeError::Malformed("missing PACKET_COUNT".to_string())),
    };

    let mut r = JsonReader {
        data,
        type_errors: Vec::new(),
    };

    let mut record = TelemetryRecord::new(r.text("TEAM_ID"), r.text("MISSION_TIME"), packet_count);
    record.mode = r.parsed("MODE");
    record.state = r.parsed("STATE");
    record.altitude = r.number("ALTITUDE");
    record.temperature = r.number("TEMPERATURE");
    record.pressure = r.number("PRESSURE");
    record.voltage = r.number("VOLTAGE");
    record.current = r.number("CURRENT");
    record.gyro = Axes::new(r.number("GYRO_R"), r.number("GYRO_P"), r.number("GYRO_Y"));
    record.accel = Axes::new(r.number("ACCEL_R"), r.number("ACCEL_P"), r.number("ACCEL_Y"));
    if ["MAG_X", "MAG_Y", "MAG_Z"].iter().any(|key| data.contains_key(*key)) {
        record.magnetometer = Some(Vector3 {
            x: r.number("MAG_X"),
            y: r.number("MAG_Y"),
            z: r.number("MAG_Z"),
        });
    }
    record.gps = GpsData {
        time: r.text("GPS_TIME"),
        altitude: r.number("GPS_ALTITUDE"),
        latitude: r.number("GPS_LATITUDE"),
        longitude: r.number("GPS_LONGITUDE"),
        satellites: r.count("GPS_SATS"),
        fix: r.fix("GPS_FIX"),
    };
    record.cmd_echo = r.text("CMD_ECHO");

    Ok(Decoded {
        record,
        type_errors: r.type_errors,
    })
}

struct JsonReader<'a> {
    data: &'a Map<String, Value>,
    type_errors: Vec<&'static str>,
}

impl JsonReader<'_> {
    fn text(&self, key: &str) -> String {
        match self.data.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    fn number(&mut self, key: &'static str) -> f64 {
        let data = self.data;
        let value = match data.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("nan") => {
                return f64::NAN
            }
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            None | Some(Value::Null) => return f64::NAN,
            Some(_) => None,
        };
        match value {
            Some(v) if v.is_finite() => v,
            _ => {
                self.type_errors.push(key);
                f64::NAN
            }
        }
    }

    fn count(&mut self, key: &'static str) -> Option<u32> {
        let data = self.data;
        match data.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_u64().and_then(|v| u32::try_from(v).ok()) {
                Some(v) => Some(v),
                None => {
                    self.type_errors.push(key);
                    None
                }
            },
            Some(Value::String(s)) => self.parse_str(s, key),
            Some(_) => {
                self.type_errors.push(key);
                None
            }
        }
    }

    fn parsed<T: std::str::FromStr>(&mut self, key: &'static str) -> Option<T> {
        let data = self.data;
        match data.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => self.parse_str(s, key),
            Some(_) => {
                self.type_errors.push(key);
                None
            }
        }
    }

    fn parse_str<T: std::str::FromStr>(&mut self, s: &str, key: &'static str) -> Option<T> {
        if s.trim().is_empty() {
            return None;
        }
        match s.trim().parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                self.type_errors.push(key);
                None
            }
        }
    }

    fn fix(&mut self, key: &'static str) -> Option<bool> {
        let data = self.data;
        match data.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::Number(n)) => Some(n.as_f64().is_some_and(|v| v != 0.0)),
            Some(Value::String(s)) => match s.trim().to_ascii_uppercase().as_str() {
                "" => None,
                "1" | "FIX" | "TRUE" => Some(true),
                "0" | "NO_FIX" | "FALSE" => Some(false),
                _ => {
                    self.type_errors.push(key);
                    None
                }
            },
            Some(_) => {
                self.type_errors.push(key);
                None
            }
        }
    }
}
