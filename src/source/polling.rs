//! # Polling Source
//!
//! Re-fetches the whole append-only telemetry text resource on a fixed
//! interval and emits only the lines not processed on an earlier tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::resource::TextResource;
use super::SourceEvent;
use crate::error::{DecodeError, GroundStationError};
use crate::session::ConnectionStatus;
use crate::telemetry::decoder::{decode_line, CsvLayout, DecodedLine};

/// Tracks how much of the resource has been consumed
///
/// Only newline-terminated lines count: a line still being written by the
/// producer is picked up on a later tick once complete. A resource that got
/// shorter, or whose header row or last consumed line changed, was recreated
/// and is re-read from the top.
#[derive(Debug, Clone)]
pub struct LineCursor {
    lines_seen: usize,
    header: Option<String>,
    last_line: Option<String>,
    layout: CsvLayout,
    team_id: String,
}

impl LineCursor {
    pub fn new(team_id: impl Into<String>) -> Self {
        Self {
            lines_seen: 0,
            header: None,
            last_line: None,
            layout: CsvLayout::FlightComputer,
            team_id: team_id.into(),
        }
    }

    /// Complete lines consumed so far, header included
    pub fn lines_seen(&self) -> usize {
        self.lines_seen
    }

    pub fn layout(&self) -> CsvLayout {
        self.layout
    }

    /// Decode the complete lines of `text` beyond the cursor
    ///
    /// # Returns
    ///
    /// * `Vec<SourceEvent>` - Events for every new complete line (possibly none)
    pub fn advance(&mut self, text: &str) -> Vec<SourceEvent> {
        let complete: Vec<&str> = text.split_inclusive('\n').filter(|l| l.ends_with('\n')).collect();
        self.ingest(&complete)
    }

    /// Decode everything left in a resource that will not grow any more
    ///
    /// Unlike [`advance`](Self::advance), a last line without a trailing
    /// newline is decoded too. Meant as the final read of the resource.
    pub fn finish(&mut self, text: &str) -> Vec<SourceEvent> {
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        self.ingest(&lines)
    }

    fn ingest(&mut self, lines: &[&str]) -> Vec<SourceEvent> {
        if self.was_recreated(lines) {
            warn!(
                "Telemetry resource was recreated ({} lines, {} already read), re-reading from the top",
                lines.len(),
                self.lines_seen
            );
            self.lines_seen = 0;
            self.header = None;
            self.last_line = None;
        }

        let mut events = Vec::new();
        for (index, line) in lines.iter().enumerate().skip(self.lines_seen) {
            if index == 0 {
                self.header = Some(line.trim_end().to_string());
                self.layout = CsvLayout::from_header(line);
                debug!("Header selects {:?} layout", self.layout);
                continue;
            }

            match decode_line(line, self.layout, &self.team_id) {
                Ok(DecodedLine::Record(decoded)) => events.push(SourceEvent::Record(decoded)),
                Ok(DecodedLine::Event(event)) => events.push(SourceEvent::Event(event)),
                Err(DecodeError::Empty) => {}
                Err(err) => events.push(SourceEvent::DecodeFailed(err)),
            }
        }
        self.lines_seen = lines.len();
        if let Some(last) = lines.last() {
            self.last_line = Some(last.trim_end().to_string());
        }

        events
    }

    fn was_recreated(&self, lines: &[&str]) -> bool {
        if lines.len() < self.lines_seen {
            return true;
        }
        let header_changed = match (&self.header, lines.first()) {
            (Some(header), Some(first)) => header != first.trim_end(),
            _ => false,
        };
        let last_seen = self.lines_seen.checked_sub(1).and_then(|i| lines.get(i));
        let tail_changed = match (&self.last_line, last_seen) {
            (Some(last), Some(line)) => last != line.trim_end(),
            _ => false,
        };
        header_changed || tail_changed
    }
}

/// Polling strategy over one text resource
pub struct PollingSource {
    resource: Arc<dyn TextResource>,
    poll_interval: Duration,
    fetch_timeout: Duration,
    team_id: String,
}

impl PollingSource {
    pub fn new(
        resource: Arc<dyn TextResource>,
        poll_interval: Duration,
        fetch_timeout: Duration,
        team_id: impl Into<String>,
    ) -> Self {
        Self {
            resource,
            poll_interval,
            fetch_timeout,
            team_id: team_id.into(),
        }
    }

    /// Task body: tick, fetch, decode, forward, until the receiver goes away
    ///
    /// Each tick runs to completion before the next; a fetch that overruns
    /// `fetch_timeout` is dropped and its result never seen.
    pub(super) async fn run(&self, events: mpsc::Sender<SourceEvent>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut cursor = LineCursor::new(self.team_id.clone());
        let mut connected = false;
        let location = self.resource.describe();

        info!("Polling {} every {:?}", location, self.poll_interval);
        if events.send(SourceEvent::Status(ConnectionStatus::Connecting)).await.is_err() {
            return;
        }

        loop {
            ticker.tick().await;

            let text = match timeout(self.fetch_timeout, self.resource.fetch()).await {
                Ok(Ok(text)) => text,
                Ok(Err(err)) => {
                    let err = match err {
                        GroundStationError::SourceUnavailable(_) => err,
                        other => GroundStationError::SourceUnavailable(other.to_string()),
                    };
                    warn!("{}, skipping tick", err);
                    continue;
                }
                Err(_) => {
                    warn!("Fetch of {} exceeded {:?}, skipping tick", location, self.fetch_timeout);
                    continue;
                }
            };

            if !connected {
                connected = true;
                if events.send(SourceEvent::Status(ConnectionStatus::Connected)).await.is_err() {
                    return;
                }
            }

            let batch = cursor.advance(&text);
            if !batch.is_empty() {
                debug!("Read {} new line(s) from {}", batch.len(), location);
            }
            for event in batch {
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
}
