//! # Telemetry Source Module
//!
//! Ingestion strategies that turn an external telemetry feed into one
//! stream of [`SourceEvent`]s.
//!
//! This module handles:
//! - Polling an append-only text resource (local file or HTTP)
//! - Streaming JSON envelopes over a WebSocket with latched reconnect
//! - Running exactly one worker task per source and cancelling it on stop

pub mod polling;
pub mod resource;
pub mod streaming;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{SourceConfig, SourceKind};
use crate::error::{DecodeError, Result};
use crate::session::ConnectionStatus;
use crate::telemetry::decoder::{Decoded, LineEvent};
use crate::uplink::StreamUplink;
use polling::PollingSource;
use resource::resource_for;
use streaming::{StreamingSource, WebSocketTransport};

/// Capacity of the channel between a source worker and the station
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything a source can report
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Record(Decoded),
    Event(LineEvent),
    DecodeFailed(DecodeError),
    Status(ConnectionStatus),
}

/// Ingestion strategy selected by configuration
pub enum Strategy {
    Polling(Arc<PollingSource>),
    Streaming(StreamingSource),
}

/// One telemetry source and its worker task
pub struct TelemetrySource {
    strategy: Strategy,
    task: Option<JoinHandle<()>>,
}

impl TelemetrySource {
    pub fn polling(source: PollingSource) -> Self {
        Self {
            strategy: Strategy::Polling(Arc::new(source)),
            task: None,
        }
    }

    pub fn streaming(source: StreamingSource) -> Self {
        Self {
            strategy: Strategy::Streaming(source),
            task: None,
        }
    }

    /// Build the configured strategy
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client for a polled URL cannot be built
    pub fn from_config(config: &SourceConfig, team_id: &str) -> Result<Self> {
        Ok(match config.kind {
            SourceKind::Polling => {
                let resource = resource_for(&config.location, config.fetch_timeout())?;
                Self::polling(PollingSource::new(
                    Arc::from(resource),
                    config.poll_interval(),
                    config.fetch_timeout(),
                    team_id,
                ))
            }
            SourceKind::Streaming => Self::streaming(StreamingSource::new(
                Box::new(WebSocketTransport::new(config.url.clone())),
                config.reconnect_backoff(),
            )),
        })
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Spawn the worker feeding `events`
    ///
    /// Does nothing if a worker is already running. A streaming source owns
    /// a single transport and can only be started once.
    pub fn start(&mut self, events: mpsc::Sender<SourceEvent>) {
        if self.is_running() {
            debug!("Source already running");
            return;
        }

        self.task = match &mut self.strategy {
            Strategy::Polling(source) => {
                let source = Arc::clone(source);
                Some(tokio::spawn(async move { source.run(events).await }))
            }
            Strategy::Streaming(source) => match source.take_worker() {
                Some(worker) => Some(tokio::spawn(worker.run(events))),
                None => {
                    warn!("Streaming source was already used; create a new one to reconnect");
                    None
                }
            },
        };
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the worker and wait until it is gone
    ///
    /// Idempotent and safe to call on a source that never started. Once this
    /// returns the worker can no longer emit events.
    pub async fn stop(&mut self) {
        if let Strategy::Streaming(source) = &self.strategy {
            source.release();
        }

        if let Some(task) = self.task.take() {
            task.abort();
            match task.await {
                Ok(()) => debug!("Source worker had already finished"),
                Err(err) if err.is_cancelled() => info!("Source worker stopped"),
                Err(err) => warn!("Source worker failed: {}", err),
            }
        }
    }

    /// Uplink riding on the streaming connection, if this source has one
    pub fn uplink(&self) -> Option<StreamUplink> {
        match &self.strategy {
            Strategy::Polling(_) => None,
            Strategy::Streaming(source) => Some(StreamUplink::new(source.open_flag(), source.outbound())),
        }
    }
}
