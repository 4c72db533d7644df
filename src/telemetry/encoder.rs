//! # Telemetry Export Encoder
//!
//! Encodes buffered records into the official delimited export layout.
//! Column order and numeric precision are fixed for interoperability with
//! downstream review tooling.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use tracing::info;

use super::record::{TelemetryRecord, OFFICIAL_COLUMNS};
use crate::error::{GroundStationError, Result};

/// Header row of the export artifact
pub fn export_header() -> String {
    OFFICIAL_COLUMNS.join(",")
}

/// Encode one record as an export row (no trailing newline)
///
/// Measurements are written at their display precision; NaN sentinels are
/// written as `NaN`. Absent counts and enums are written as empty fields.
pub fn encode_record(record: &TelemetryRecord) -> String {
    let mut row = String::with_capacity(160);

    // Writing into a String cannot fail
    let _ = write!(
        row,
        "{},{},{},{},{},{:.1},{:.1},{:.1},{:.1},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{},{:.1},{:.4},{:.4},{},{}",
        record.team_id,
        record.mission_time,
        record.packet_count,
        record.mode.map(|m| m.as_wire()).unwrap_or(""),
        record.state.map(|s| s.as_wire()).unwrap_or(""),
        record.altitude,
        record.temperature,
        record.pressure,
        record.voltage,
        record.current,
        record.gyro.roll,
        record.gyro.pitch,
        record.gyro.yaw,
        record.accel.roll,
        record.accel.pitch,
        record.accel.yaw,
        record.gps.time,
        record.gps.altitude,
        record.gps.latitude,
        record.gps.longitude,
        record.gps.satellites.map(|s| s.to_string()).unwrap_or_default(),
        record.cmd_echo,
    );

    row
}

/// Check that the free-text fields of `record` survive the delimited layout
///
/// Only `CMD_ECHO`, the last column, may contain the delimiter. No field may
/// contain a line break.
///
/// # Errors
///
/// Returns `ExportRejected` naming the packet and the offending column
pub fn check_exportable(record: &TelemetryRecord) -> Result<()> {
    let inner = [
        ("TEAM_ID", &record.team_id),
        ("MISSION_TIME", &record.mission_time),
        ("GPS_TIME", &record.gps.time),
    ];
    for (column, value) in inner {
        if value.contains(&[',', '\n', '\r'][..]) {
            return Err(rejected(record, column, value));
        }
    }
    if record.cmd_echo.contains(&['\n', '\r'][..]) {
        return Err(rejected(record, "CMD_ECHO", &record.cmd_echo));
    }
    Ok(())
}

fn rejected(record: &TelemetryRecord, column: &str, value: &str) -> GroundStationError {
    GroundStationError::ExportRejected(format!(
        "packet {}: {} {:?} contains a delimiter",
        record.packet_count, column, value
    ))
}

/// Encode a full export: header row followed by one row per record, each
/// terminated by a newline
///
/// # Errors
///
/// Returns `ExportRejected` if a record fails [`check_exportable`]
pub fn encode_csv<'a, I>(records: I) -> Result<String>
where
    I: IntoIterator<Item = &'a TelemetryRecord>,
{
    let mut csv = export_header();
    csv.push('\n');
    for record in records {
        check_exportable(record)?;
        csv.push_str(&encode_record(record));
        csv.push('\n');
    }
    Ok(csv)
}

/// Export file name: `cansat-telemetry-Team<TEAM>-<YYYY-MM-DD>.csv`
pub fn export_file_name(team_id: &str, date: NaiveDate) -> String {
    let team = if team_id.is_empty() { "XYZ" } else { team_id };
    format!("cansat-telemetry-Team{}-{}.csv", team, date.format("%Y-%m-%d"))
}

/// Write an export of `records` into `dir`, named after the first record's team
///
/// # Returns
///
/// * `Result<PathBuf>` - Path of the written file
///
/// # Errors
///
/// Returns error if a record cannot be encoded, the directory cannot be
/// created, or the file cannot be written. Nothing is written for a
/// rejected record.
pub async fn write_export(dir: &Path, records: &[TelemetryRecord]) -> Result<PathBuf> {
    let team = records.first().map(|r| r.team_id.as_str()).unwrap_or("");
    let path = dir.join(export_file_name(team, Utc::now().date_naive()));
    let csv = encode_csv(records)?;

    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, csv).await?;

    info!("Exported {} records to {}", records.len(), path.display());
    Ok(path)
}
