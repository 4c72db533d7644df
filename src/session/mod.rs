//! # Session Module
//!
//! One continuous connection's accumulated telemetry state.
//!
//! This module handles:
//! - Owning the bounded record buffer and the loss counters
//! - Stamping pending command echoes onto the next accepted record
//! - Keeping the recent flight-event log
//! - Handing out owned snapshots and windows to consumers

pub mod buffer;
pub mod tracker;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::DecodeError;
use crate::telemetry::decoder::{Decoded, LineEvent};
use crate::telemetry::record::{GeoPoint, TelemetryRecord};
use buffer::{RingBuffer, DEFAULT_CAPACITY};
use tracker::{SequenceStats, SequenceStep, SequenceTracker};

/// Number of flight events retained for the log panel
pub const EVENT_LOG_DEPTH: usize = 50;

/// Connection status as shown to the operator
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The source refused the connection; no retry until a manual reconnect
    Rejected(String),
}

/// A flight event line, stamped with its ground reception time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightEvent {
    pub received_at: DateTime<Utc>,
    pub text: String,
}

/// Counters exposed to the metrics row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub received: u64,
    pub lost: u64,
    pub segments_restarted: u64,
    /// Lines or messages dropped as malformed
    pub malformed: u64,
    /// Fields replaced by their sentinel
    pub type_errors: u64,
    /// Records currently held in the buffer
    pub buffered: usize,
}

impl SessionStats {
    pub fn loss_percent(&self) -> f64 {
        SequenceStats {
            received: self.received,
            lost: self.lost,
            segments_restarted: self.segments_restarted,
        }
        .loss_percent()
    }
}

/// What happens to buffered records on reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    ClearBuffer,
    /// Keep records so they can still be exported
    KeepBuffer,
}

/// Owned, read-only copy of the session handed to consumers
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub records: Vec<TelemetryRecord>,
    pub stats: SessionStats,
    pub status: ConnectionStatus,
    pub last_echo: Option<String>,
    pub events: Vec<FlightEvent>,
}

impl SessionSnapshot {
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.records.last()
    }
}

/// Accumulated state for one connection.
///
/// The session is the only writer of its buffer and counters. Everything it
/// hands out is an owned copy.
#[derive(Debug, Clone)]
pub struct Session {
    started_at: DateTime<Utc>,
    buffer: RingBuffer<TelemetryRecord>,
    tracker: SequenceTracker,
    status: ConnectionStatus,
    pending_echo: Option<String>,
    last_echo: Option<String>,
    events: RingBuffer<FlightEvent>,
    malformed: u64,
    type_errors: u64,
}

impl Session {
    /// Create a session whose buffer holds at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            started_at: Utc::now(),
            buffer: RingBuffer::new(capacity),
            tracker: SequenceTracker::new(),
            status: ConnectionStatus::Disconnected,
            pending_echo: None,
            last_echo: None,
            events: RingBuffer::new(EVENT_LOG_DEPTH),
            malformed: 0,
            type_errors: 0,
        }
    }

    /// Accept one decoded record
    ///
    /// The record is always appended, whatever its sequence number says; the
    /// tracker only accounts for loss and restarts.
    pub fn accept(&mut self, decoded: Decoded) -> SequenceStep {
        let Decoded {
            mut record,
            type_errors,
        } = decoded;

        if !type_errors.is_empty() {
            debug!(
                "Packet {}: substituted sentinel for {}",
                record.packet_count,
                type_errors.join(", ")
            );
            self.type_errors += type_errors.len() as u64;
        }

        if let Some(echo) = self.pending_echo.take() {
            if record.cmd_echo.is_empty() {
                record.cmd_echo = echo;
            }
        }

        let step = self.tracker.observe(record.packet_count);
        match step {
            SequenceStep::Gap { lost } => {
                warn!("Lost {} packet(s) before packet {}", lost, record.packet_count)
            }
            SequenceStep::Restart { previous } => info!(
                "Sequence restarted at packet {} (previous {}), starting new segment",
                record.packet_count, previous
            ),
            SequenceStep::First | SequenceStep::Contiguous => {}
        }

        self.buffer.append(record);
        step
    }

    /// Accept a record with no sentinel substitutions
    pub fn accept_record(&mut self, record: TelemetryRecord) -> SequenceStep {
        self.accept(Decoded {
            record,
            type_errors: Vec::new(),
        })
    }

    /// Route an out-of-band event line
    pub fn handle_event(&mut self, event: LineEvent) {
        match event {
            LineEvent::CommandEcho(echo) => {
                info!("Command echo: {}", echo);
                self.pending_echo = Some(echo.clone());
                self.last_echo = Some(echo);
            }
            LineEvent::Flight(text) => {
                info!("[FLIGHT EVENT] {}", text);
                self.events.append(FlightEvent {
                    received_at: Utc::now(),
                    text,
                });
            }
        }
    }

    /// Count a dropped line; empty lines are ignored entirely
    pub fn record_decode_failure(&mut self, error: &DecodeError) {
        if let DecodeError::Malformed(reason) = error {
            warn!("Dropped malformed telemetry: {}", reason);
            self.malformed += 1;
        }
    }

    pub fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            debug!("Connection status {:?} -> {:?}", self.status, status);
            self.status = status;
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.buffer.latest()
    }

    /// Inclusive window of records ending at `end_index`
    pub fn window(&self, end_index: usize, size: usize) -> Vec<TelemetryRecord> {
        self.buffer.window(end_index, size)
    }

    /// The most recent `size` records
    pub fn recent(&self, size: usize) -> Vec<TelemetryRecord> {
        self.buffer.tail(size)
    }

    /// Every buffered record, oldest first
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.buffer.to_vec()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Valid GPS positions of the buffered records, in reception order
    pub fn flight_path(&self) -> Vec<GeoPoint> {
        self.buffer.iter().filter_map(|r| r.gps.position()).collect()
    }

    pub fn last_echo(&self) -> Option<&str> {
        self.last_echo.as_deref()
    }

    pub fn events(&self) -> Vec<FlightEvent> {
        self.events.to_vec()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.tracker.last_sequence()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stats(&self) -> SessionStats {
        let seq = self.tracker.stats();
        SessionStats {
            received: seq.received,
            lost: seq.lost,
            segments_restarted: seq.segments_restarted,
            malformed: self.malformed,
            type_errors: self.type_errors,
            buffered: self.buffer.len(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            records: self.records(),
            stats: self.stats(),
            status: self.status.clone(),
            last_echo: self.last_echo.clone(),
            events: self.events(),
        }
    }

    /// Zero the counters and forget the last sequence number
    pub fn reset(&mut self, mode: ResetMode) {
        self.tracker.reset();
        self.malformed = 0;
        self.type_errors = 0;
        self.pending_echo = None;
        if mode == ResetMode::ClearBuffer {
            self.buffer.clear();
            self.events.clear();
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::record::DEFAULT_TEAM_ID;

    fn record(packet: u64) -> TelemetryRecord {
        let mut r = TelemetryRecord::new(DEFAULT_TEAM_ID, "00:00:00", packet);
        r.altitude = packet as f64;
        r
    }

    #[test]
    fn test_gap_scenario() {
        let mut session = Session::new(500);
        for packet in [1, 2, 3, 5, 6] {
            session.accept_record(record(packet));
        }

        let stats = session.stats();
        assert_eq!(stats.received, 5);
        assert_eq!(stats.lost, 1);
        assert_eq!(session.len(), 5);
        assert_eq!(session.latest().unwrap().packet_count, 6);
    }

    #[test]
    fn test_out_of_order_is_not_reordered() {
        let mut session = Session::new(10);
        for packet in [1, 3, 2] {
            session.accept_record(record(packet));
        }
        let order: Vec<u64> = session.records().iter().map(|r| r.packet_count).collect();
        assert_eq!(order, vec![1, 3, 2]);
        assert_eq!(session.stats().segments_restarted, 1);
    }

    #[test]
    fn test_capacity_is_respected() {
        let mut session = Session::new(3);
        for packet in 1..=10 {
            session.accept_record(record(packet));
        }
        assert_eq!(session.len(), 3);
        assert_eq!(session.records()[0].packet_count, 8);
        assert_eq!(session.stats().received, 10, "Counters cover evicted records too");
    }

    #[test]
    fn test_pending_echo_stamps_next_record_only() {
        let mut session = Session::default();
        session.handle_event(LineEvent::CommandEcho("CX,ON".to_string()));
        session.accept_record(record(1));
        session.accept_record(record(2));

        let records = session.records();
        assert_eq!(records[0].cmd_echo, "CX,ON");
        assert!(records[1].cmd_echo.is_empty());
        assert_eq!(session.last_echo(), Some("CX,ON"));
    }

    #[test]
    fn test_record_echo_wins_over_pending() {
        let mut session = Session::default();
        session.handle_event(LineEvent::CommandEcho("C".to_string()));
        let mut r = record(1);
        r.cmd_echo = "D".to_string();
        session.accept_record(r);
        assert_eq!(session.latest().unwrap().cmd_echo, "D");
    }

    #[test]
    fn test_flight_events_are_bounded() {
        let mut session = Session::default();
        for i in 0..(EVENT_LOG_DEPTH + 5) {
            session.handle_event(LineEvent::Flight(format!("EVENT {}", i)));
        }
        let events = session.events();
        assert_eq!(events.len(), EVENT_LOG_DEPTH);
        assert_eq!(events[0].text, "EVENT 5");
    }

    #[test]
    fn test_decode_failures_are_counted() {
        let mut session = Session::default();
        session.record_decode_failure(&DecodeError::Empty);
        session.record_decode_failure(&DecodeError::Malformed("short".to_string()));
        session.accept(Decoded {
            record: record(1),
            type_errors: vec!["ALTITUDE", "GPS_SATS"],
        });

        let stats = session.stats();
        assert_eq!(stats.malformed, 1, "Empty lines are not counted");
        assert_eq!(stats.type_errors, 2);
        assert_eq!(stats.received, 1);
    }

    #[test]
    fn test_flight_path_skips_invalid_gps() {
        let mut session = Session::default();
        let mut a = record(1);
        a.gps.latitude = 28.5;
        a.gps.longitude = 77.2;
        let b = record(2);
        session.accept_record(a);
        session.accept_record(b);

        assert_eq!(
            session.flight_path(),
            vec![GeoPoint {
                latitude: 28.5,
                longitude: 77.2
            }]
        );
    }

    #[test]
    fn test_reset_keep_buffer() {
        let mut session = Session::default();
        session.accept_record(record(1));
        session.accept_record(record(4));
        session.reset(ResetMode::KeepBuffer);

        assert_eq!(session.stats().received, 0);
        assert_eq!(session.stats().lost, 0);
        assert_eq!(session.last_sequence(), None);
        assert_eq!(session.len(), 2, "Records stay available for export");

        session.reset(ResetMode::ClearBuffer);
        assert!(session.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut session = Session::default();
        session.accept_record(record(1));
        let snapshot = session.snapshot();
        session.accept_record(record(2));

        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.latest().unwrap().packet_count, 1);
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn test_status() {
        let mut session = Session::default();
        assert!(!session.is_connected());
        session.set_status(ConnectionStatus::Connected);
        assert!(session.is_connected());
        session.set_status(ConnectionStatus::Rejected("403".to_string()));
        assert!(!session.is_connected());
    }
}
