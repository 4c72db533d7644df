//! # CanSat Ground Station
//!
//! Command-line front end for the ground station core.
//!
//! Subcommands:
//! - `monitor`: connect the configured telemetry source and report the session
//! - `bridge`: relay the XBee radio into the telemetry file and forward commands
//! - `send`: write one command to the uplink command file
//! - `export`: convert a telemetry file into the official export layout

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cansat_ground::bridge::{BridgeSettings, RadioBridge};
use cansat_ground::config::Config;
use cansat_ground::serial::XbeeRadio;
use cansat_ground::session::Session;
use cansat_ground::source::polling::LineCursor;
use cansat_ground::source::SourceEvent;
use cansat_ground::station::GroundStation;
use cansat_ground::telemetry::encoder::write_export;
use cansat_ground::uplink::FileUplink;

/// Interval between session status log lines in `monitor`
const STATUS_INTERVAL_MS: u64 = 5000;

#[derive(Parser)]
#[command(name = "cansat-ground")]
#[command(about = "CanSat ground station: telemetry ingestion, session tracking and command uplink")]
#[command(version)]
struct Cli {
    /// Configuration file; defaults are used when it does not exist
    #[arg(short, long, global = true, default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the configured source and log session status until Ctrl+C
    Monitor {
        /// Export the buffered records on exit
        #[arg(long)]
        export_on_exit: bool,
    },

    /// Relay the radio link into the telemetry file until Ctrl+C
    Bridge {
        /// Serial device, overriding the configured port
        #[arg(short, long)]
        port: Option<String>,
    },

    /// Send a command through the command file
    Send {
        /// Directive (`C` start stream, `D` stop stream)
        command: String,

        /// Skip the directive allow-list
        #[arg(long)]
        raw: bool,
    },

    /// Export a telemetry text resource in the official layout
    Export {
        /// Telemetry file to read, defaults to the configured source location
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    // Keep the guard alive so buffered log lines reach the file
    let _log_guard = init_logging(&config);

    info!("CanSat ground station v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Monitor { export_on_exit } => monitor(config, export_on_exit).await,
        Commands::Bridge { port } => bridge(config, port).await,
        Commands::Send { command, raw } => send(&config, &command, raw).await,
        Commands::Export { input } => export(&config, input).await,
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))
    } else {
        Ok(Config::default())
    }
}

fn init_logging(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let stdout = tracing_subscriber::fmt::layer();

    if config.logging.log_dir.is_empty() {
        tracing_subscriber::registry().with(filter).with(stdout).init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&config.logging.log_dir, "cansat-ground.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Some(guard)
}

async fn monitor(config: Config, export_on_exit: bool) -> Result<()> {
    let mut station = GroundStation::new(config);
    station.connect_configured().await?;

    let mut status_interval = interval(Duration::from_millis(STATUS_INTERVAL_MS));
    status_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            alive = station.process_next() => {
                if !alive {
                    warn!("Telemetry source stopped");
                    break;
                }
            }

            _ = status_interval.tick() => {
                let snapshot = station.snapshot();
                let latest = snapshot.latest().map(|r| {
                    format!(
                        "packet {} {} alt {:.1} m",
                        r.packet_count,
                        r.state.map(|s| s.as_wire()).unwrap_or("N/A"),
                        r.altitude
                    )
                });
                info!(
                    "{:?}: {} received, {} lost ({:.2}%), {} malformed | {}",
                    snapshot.status,
                    snapshot.stats.received,
                    snapshot.stats.lost,
                    snapshot.stats.loss_percent(),
                    snapshot.stats.malformed,
                    latest.unwrap_or_else(|| "no telemetry yet".to_string())
                );
                if let Some(sample) = station.recent_metrics().last() {
                    info!(
                        "battery {:.0}%, descent {:.1} m/s, {:.2} g",
                        sample.battery_percent, sample.descent_rate, sample.g_force
                    );
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    station.disconnect().await;

    if export_on_exit && !station.session().is_empty() {
        let path = station.export().await?;
        info!("Exported session to {}", path.display());
    }

    Ok(())
}

async fn bridge(config: Config, port: Option<String>) -> Result<()> {
    let device = port.unwrap_or_else(|| config.bridge.port.clone());
    let radio = XbeeRadio::open(&device, config.bridge.baud_rate)?;
    info!("Radio open at {}", radio.device_path());

    let mut bridge = RadioBridge::new(radio, BridgeSettings::from_config(&config));
    let stats = bridge
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Ctrl+C handler failed: {}", e);
            }
        })
        .await?;

    info!(
        "Received {} packets, lost {} ({:.2}%)",
        stats.received,
        stats.lost,
        stats.loss_percent()
    );
    Ok(())
}

async fn send(config: &Config, command: &str, raw: bool) -> Result<()> {
    let uplink = FileUplink::new(config.uplink.command_path());
    if raw {
        uplink.send_raw(command).await?;
    } else {
        uplink.send(command).await?;
    }
    Ok(())
}

async fn export(config: &Config, input: Option<PathBuf>) -> Result<()> {
    let input = input.unwrap_or_else(|| PathBuf::from(&config.source.location));
    let text = tokio::fs::read_to_string(&input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;

    // Size the session to the file so nothing is evicted before export
    let mut session = Session::new(text.lines().count());
    let mut cursor = LineCursor::new(config.session.team_id.clone());
    for event in cursor.finish(&text) {
        match event {
            SourceEvent::Record(decoded) => {
                session.accept(decoded);
            }
            SourceEvent::Event(event) => session.handle_event(event),
            SourceEvent::DecodeFailed(err) => session.record_decode_failure(&err),
            SourceEvent::Status(_) => {}
        }
    }

    let stats = session.stats();
    info!(
        "Read {} records ({} lost, {} malformed) from {}",
        stats.received,
        stats.lost,
        stats.malformed,
        input.display()
    );

    let path = write_export(Path::new(&config.export.dir), &session.records()).await?;
    println!("{}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send() {
        let cli = Cli::parse_from(["cansat-ground", "send", "C"]);
        match cli.command {
            Commands::Send { command, raw } => {
                assert_eq!(command, "C");
                assert!(!raw);
            }
            _ => panic!("Expected send subcommand"),
        }
        assert_eq!(cli.config, PathBuf::from("config/default.toml"));
    }

    #[test]
    fn test_parse_bridge_port_override() {
        let cli = Cli::parse_from(["cansat-ground", "--config", "ground.toml", "bridge", "--port", "/dev/ttyUSB1"]);
        assert_eq!(cli.config, PathBuf::from("ground.toml"));
        assert!(matches!(cli.command, Commands::Bridge { port: Some(ref p) } if p == "/dev/ttyUSB1"));
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/cansat.toml")).unwrap();
        assert_eq!(config.session.capacity, 500);
    }
}
