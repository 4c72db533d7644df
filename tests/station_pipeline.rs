//! End-to-end ingestion through the public station API

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cansat_ground::config::Config;
use cansat_ground::error::{GroundStationError, Result};
use cansat_ground::session::ConnectionStatus;
use cansat_ground::source::polling::PollingSource;
use cansat_ground::source::resource::FileResource;
use cansat_ground::source::streaming::{StreamTransport, StreamingSource};
use cansat_ground::source::TelemetrySource;
use cansat_ground::station::GroundStation;
use tempfile::TempDir;

const HEADER: &str = "TEAM_ID,MISSION_TIME,PACKET_COUNT,MODE,STATE,ALTITUDE,TEMPERATURE,PRESSURE,VOLTAGE,CURRENT,GYRO_R,GYRO_P,GYRO_Y,ACCEL_R,ACCEL_P,ACCEL_Y,GPS_TIME,GPS_ALTITUDE,GPS_LATITUDE,GPS_LONGITUDE,GPS_SATS,CMD_ECHO";

fn official_line(packet: u64) -> String {
    format!(
        "1000,00:00:{:02},{},F,ASCENT,{}.0,21.5,99.8,8.1,0.52,0.10,0.20,0.30,0.00,0.00,9.81,12:00:{:02},{}.5,28.5,77.2,7,",
        packet, packet, packet * 25, packet, packet * 25
    )
}

/// Transport whose every connect attempt fails
struct UnreachableTransport {
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl StreamTransport for UnreachableTransport {
    async fn connect(&mut self) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(GroundStationError::SourceUnavailable("connection refused".to_string()))
    }

    async fn next_message(&mut self) -> Option<Result<String>> {
        None
    }

    async fn send(&mut self, _text: String) -> Result<()> {
        Err(GroundStationError::UplinkTransportClosed)
    }

    fn describe(&self) -> String {
        "unreachable".to_string()
    }
}

#[tokio::test]
async fn test_gap_scenario_from_telemetry_file() {
    let dir = TempDir::new().unwrap();
    let csv = dir.path().join("cansat_telemetry.csv");

    let mut text = format!("{}\n", HEADER);
    text.push_str("EVENT,12:00:00,CMD_ECHO:C\n");
    for packet in [1, 2, 3, 5, 6] {
        text.push_str(&official_line(packet));
        text.push('\n');
    }
    text.push_str("1000,00:00:07,7,F\n");
    text.push_str("EVENT,12:00:07,APOGEE\n");
    std::fs::write(&csv, text).unwrap();

    let mut config = Config::default();
    config.export.dir = dir.path().join("exports").display().to_string();
    let mut station = GroundStation::new(config);
    station
        .connect(TelemetrySource::polling(PollingSource::new(
            Arc::new(FileResource::new(&csv)),
            Duration::from_millis(200),
            Duration::from_millis(100),
            "1000",
        )))
        .await;

    while station.session().events().is_empty() {
        assert!(station.process_next().await, "Source ended early");
    }

    let snapshot = station.snapshot();
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(snapshot.stats.received, 5);
    assert_eq!(snapshot.stats.lost, 1);
    assert_eq!(snapshot.stats.malformed, 1);
    assert_eq!(snapshot.records.len(), 5);
    assert_eq!(snapshot.latest().unwrap().packet_count, 6);
    assert_eq!(snapshot.records[0].cmd_echo, "C", "Echo stamps the next record");
    assert_eq!(snapshot.last_echo.as_deref(), Some("C"));
    assert_eq!(snapshot.events[0].text, "APOGEE");
    assert_eq!(station.session().flight_path().len(), 5);

    station.disconnect().await;
    assert!(!station.is_connected());
    assert_eq!(station.session().len(), 5);

    let exported = station.export().await.unwrap();
    assert!(exported.exists());
}

#[tokio::test]
async fn test_appended_lines_are_picked_up() {
    let dir = TempDir::new().unwrap();
    let csv = dir.path().join("cansat_telemetry.csv");
    std::fs::write(&csv, format!("{}\n{}\n", HEADER, official_line(1))).unwrap();

    let mut station = GroundStation::new(Config::default());
    station
        .connect(TelemetrySource::polling(PollingSource::new(
            Arc::new(FileResource::new(&csv)),
            Duration::from_millis(50),
            Duration::from_millis(40),
            "1000",
        )))
        .await;

    while station.session().len() < 1 {
        assert!(station.process_next().await);
    }

    let mut file = std::fs::OpenOptions::new().append(true).open(&csv).unwrap();
    writeln!(file, "{}", official_line(2)).unwrap();
    drop(file);

    while station.session().len() < 2 {
        assert!(station.process_next().await);
    }
    let packets: Vec<u64> = station.session().records().iter().map(|r| r.packet_count).collect();
    assert_eq!(packets, vec![1, 2], "Each line is ingested once");

    station.disconnect().await;
}

#[tokio::test]
async fn test_recreated_telemetry_file_is_read_from_the_top() {
    let dir = TempDir::new().unwrap();
    let csv = dir.path().join("cansat_telemetry.csv");
    let first_flight: String = (1..=5).map(|p| format!("{}\n", official_line(p))).collect();
    std::fs::write(&csv, format!("{}\n{}", HEADER, first_flight)).unwrap();

    let mut station = GroundStation::new(Config::default());
    station
        .connect(TelemetrySource::polling(PollingSource::new(
            Arc::new(FileResource::new(&csv)),
            Duration::from_millis(50),
            Duration::from_millis(40),
            "1000",
        )))
        .await;

    while station.session().len() < 5 {
        assert!(station.process_next().await);
    }

    // New flight swapped in whole, already longer than the old file
    let second_flight: String = (1..=7)
        .map(|p| format!("{}\n", official_line(p).replace("ASCENT", "LAUNCH_PAD")))
        .collect();
    let staged = dir.path().join("staged.csv");
    std::fs::write(&staged, format!("{}\n{}", HEADER, second_flight)).unwrap();
    std::fs::rename(&staged, &csv).unwrap();

    while station.session().len() < 12 {
        assert!(station.process_next().await);
    }

    let packets: Vec<u64> = station.session().records().iter().map(|r| r.packet_count).collect();
    assert_eq!(packets, vec![1, 2, 3, 4, 5, 1, 2, 3, 4, 5, 6, 7]);
    let stats = station.session().stats();
    assert_eq!(stats.segments_restarted, 1, "The new flight opens a new segment");
    assert_eq!(stats.lost, 0);

    station.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_disconnect_stops_reconnects() {
    let attempts = Arc::new(AtomicU32::new(0));
    let transport = UnreachableTransport {
        attempts: Arc::clone(&attempts),
    };

    let mut station = GroundStation::new(Config::default());
    station
        .connect(TelemetrySource::streaming(StreamingSource::new(
            Box::new(transport),
            Duration::from_secs(3),
        )))
        .await;

    // Connecting, then Disconnected once the first attempt fails
    assert!(station.process_next().await);
    assert!(station.process_next().await);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    // The worker is now inside its backoff sleep
    station.disconnect().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1, "No reconnect after disconnect");
    assert!(!station.is_connected());
    assert_eq!(station.status(), &ConnectionStatus::Disconnected);
}
