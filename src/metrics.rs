//! # Derived Metrics
//!
//! Values not present on the wire: battery percentage from voltage, descent
//! rate from consecutive altitudes, and g-force magnitude from the
//! accelerometer.
//!
//! Every function is NaN-safe: a NaN input yields a NaN output so the
//! display layer can show "N/A".

use serde::Deserialize;

use crate::telemetry::record::{Axes, TelemetryRecord};

/// Standard gravity in m/s²
pub const STANDARD_GRAVITY: f64 = 9.81;

/// Sampling interval assumed when none is known (one mission-time second)
pub const DEFAULT_SAMPLE_INTERVAL_S: f64 = 1.0;

/// Voltage range mapped to 0-100% battery
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BatteryProfile {
    pub v_min: f64,
    pub v_max: f64,
}

impl BatteryProfile {
    /// 2S Li-ion pack, 6.0-8.4 V
    pub const SINGLE_CELL: BatteryProfile = BatteryProfile { v_min: 6.0, v_max: 8.4 };

    /// 3S pack, 11.1-12.6 V
    pub const MULTI_CELL: BatteryProfile = BatteryProfile { v_min: 11.1, v_max: 12.6 };

    pub fn new(v_min: f64, v_max: f64) -> Self {
        Self { v_min, v_max }
    }
}

impl Default for BatteryProfile {
    fn default() -> Self {
        Self::SINGLE_CELL
    }
}

/// Battery charge in percent, clamped to [0, 100]
///
/// # Examples
///
/// ```
/// use cansat_ground::metrics::{battery_percent, BatteryProfile};
///
/// assert!((battery_percent(7.2, BatteryProfile::SINGLE_CELL) - 50.0).abs() < 1e-9);
/// assert_eq!(battery_percent(5.0, BatteryProfile::SINGLE_CELL), 0.0);
/// assert!(battery_percent(f64::NAN, BatteryProfile::SINGLE_CELL).is_nan());
/// ```
pub fn battery_percent(voltage: f64, profile: BatteryProfile) -> f64 {
    let span = profile.v_max - profile.v_min;
    if !(span > 0.0) {
        return f64::NAN;
    }
    // f64::clamp passes NaN through
    ((voltage - profile.v_min) / span * 100.0).clamp(0.0, 100.0)
}

/// Vertical speed between two altitude samples; negative when descending
pub fn descent_rate(previous_altitude: f64, altitude: f64, dt_seconds: f64) -> f64 {
    if !(dt_seconds > 0.0) {
        return f64::NAN;
    }
    (altitude - previous_altitude) / dt_seconds
}

/// Total acceleration in g; `accel` must already be in m/s²
pub fn g_force(accel: Axes) -> f64 {
    (accel.roll.powi(2) + accel.pitch.powi(2) + accel.yaw.powi(2)).sqrt() / STANDARD_GRAVITY
}

/// Derived values for one record of a window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedSample {
    pub packet_count: u64,
    pub battery_percent: f64,
    pub descent_rate: f64,
    pub g_force: f64,
}

/// Derived values for every record of a window
///
/// The first record has no predecessor inside the window and gets a
/// descent rate of 0.
pub fn window_metrics(window: &[TelemetryRecord], profile: BatteryProfile) -> Vec<DerivedSample> {
    let mut previous: Option<&TelemetryRecord> = None;
    window
        .iter()
        .map(|record| {
            let rate = match previous {
                Some(prev) => descent_rate(prev.altitude, record.altitude, DEFAULT_SAMPLE_INTERVAL_S),
                None => 0.0,
            };
            previous = Some(record);
            DerivedSample {
                packet_count: record.packet_count,
                battery_percent: battery_percent(record.voltage, profile),
                descent_rate: rate,
                g_force: g_force(record.accel),
            }
        })
        .collect()
}
