//! # Ground Station
//!
//! Single-writer actor owning the current [`Session`], its one active
//! [`TelemetrySource`] and the uplink. Source workers only send events; the
//! station applies them one at a time, so the session needs no locking.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::metrics::{window_metrics, DerivedSample};
use crate::session::{ConnectionStatus, ResetMode, Session, SessionSnapshot};
use crate::source::{SourceEvent, TelemetrySource, EVENT_CHANNEL_CAPACITY};
use crate::telemetry::encoder::write_export;
use crate::uplink::{FileUplink, UplinkChannel, UplinkError};

pub struct GroundStation {
    config: Config,
    session: Session,
    source: Option<TelemetrySource>,
    events: Option<mpsc::Receiver<SourceEvent>>,
    uplink: UplinkChannel,
}

impl GroundStation {
    pub fn new(config: Config) -> Self {
        let session = Session::new(config.session.capacity);
        let uplink = UplinkChannel::File(FileUplink::new(config.uplink.command_path()));
        Self {
            config,
            session,
            source: None,
            events: None,
            uplink,
        }
    }

    /// Connect using the configured source
    ///
    /// # Errors
    ///
    /// Returns error if the configured source cannot be built
    pub async fn connect_configured(&mut self) -> Result<()> {
        let source = TelemetrySource::from_config(&self.config.source, &self.config.session.team_id)?;
        self.connect(source).await;
        Ok(())
    }

    /// Start a fresh session fed by `source`
    ///
    /// Any previous source is stopped first. Records of the previous session
    /// are discarded.
    pub async fn connect(&mut self, mut source: TelemetrySource) {
        self.disconnect().await;

        self.session = Session::new(self.config.session.capacity);
        self.session.set_status(ConnectionStatus::Connecting);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        source.start(tx);

        self.uplink = match source.uplink() {
            Some(stream) => UplinkChannel::Stream(stream),
            None => UplinkChannel::File(FileUplink::new(self.config.uplink.command_path())),
        };
        self.source = Some(source);
        self.events = Some(rx);
        info!("Session started");
    }

    /// Stop the source; no record is appended after this returns
    ///
    /// Counters reset, buffered records stay available for export.
    pub async fn disconnect(&mut self) {
        let Some(mut source) = self.source.take() else {
            return;
        };
        source.stop().await;

        if let Some(mut rx) = self.events.take() {
            rx.close();
            let mut discarded = 0;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                debug!("Discarded {} queued event(s) on disconnect", discarded);
            }
        }

        let stats = self.session.stats();
        info!(
            "Session ended: {} received, {} lost ({:.1}% loss)",
            stats.received,
            stats.lost,
            stats.loss_percent()
        );

        self.session.reset(ResetMode::KeepBuffer);
        self.session.set_status(ConnectionStatus::Disconnected);
        self.uplink = UplinkChannel::File(FileUplink::new(self.config.uplink.command_path()));
    }

    /// Apply one source event to the session
    pub fn apply(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Record(decoded) => {
                self.session.accept(decoded);
            }
            SourceEvent::Event(event) => self.session.handle_event(event),
            SourceEvent::DecodeFailed(err) => self.session.record_decode_failure(&err),
            SourceEvent::Status(status) => {
                if let ConnectionStatus::Rejected(reason) = &status {
                    warn!("Source rejected the connection: {}", reason);
                }
                self.session.set_status(status);
            }
        }
    }

    /// Wait for the next source event and apply it
    ///
    /// # Returns
    ///
    /// * `bool` - `false` when no source is connected or its worker has ended
    pub async fn process_next(&mut self) -> bool {
        let Some(rx) = self.events.as_mut() else {
            return false;
        };
        match rx.recv().await {
            Some(event) => {
                self.apply(event);
                true
            }
            None => false,
        }
    }

    /// Apply every event already queued without waiting
    pub fn drain_pending(&mut self) -> usize {
        let mut pending = Vec::new();
        if let Some(rx) = self.events.as_mut() {
            while let Ok(event) = rx.try_recv() {
                pending.push(event);
            }
        }
        let count = pending.len();
        for event in pending {
            self.apply(event);
        }
        count
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn status(&self) -> &ConnectionStatus {
        self.session.status()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Derived metrics for the most recent chart window
    pub fn recent_metrics(&self) -> Vec<DerivedSample> {
        let window = self.session.recent(self.config.session.window_size);
        window_metrics(&window, self.config.battery.profile())
    }

    /// Send a command through the active uplink
    pub async fn send_command(&self, command: &str) -> std::result::Result<(), UplinkError> {
        self.uplink.send(command).await
    }

    /// Send a custom command, skipping the directive allow-list
    pub async fn send_raw_command(&self, command: &str) -> std::result::Result<(), UplinkError> {
        self.uplink.send_raw(command).await
    }

    /// Export the buffered records into the configured directory
    ///
    /// # Returns
    ///
    /// * `Result<PathBuf>` - Path of the written file
    pub async fn export(&self) -> Result<PathBuf> {
        let records = self.session.records();
        write_export(&PathBuf::from(&self.config.export.dir), &records).await
    }
}
