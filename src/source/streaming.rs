//! # Streaming Source
//!
//! Persistent bidirectional connection delivering one JSON envelope per
//! message. While the operator wants a connection, a lost or failed
//! connection is retried after a fixed backoff; a rejected handshake is
//! terminal until the operator reconnects.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::SourceEvent;
use crate::error::{GroundStationError, Result};
use crate::session::ConnectionStatus;
use crate::telemetry::decoder::{decode_message, StreamMessage};

/// Depth of the queue between the uplink handle and the socket writer
pub const OUTBOUND_QUEUE_DEPTH: usize = 16;

/// Trait for message-oriented transports to enable testing
#[async_trait]
pub trait StreamTransport: Send {
    /// Open the connection
    ///
    /// # Errors
    ///
    /// `SourceRejected` when the peer refuses the handshake, anything else
    /// when the attempt failed and may be retried.
    async fn connect(&mut self) -> Result<()>;

    /// Next inbound text message; `None` once the connection has closed
    async fn next_message(&mut self) -> Option<Result<String>>;

    /// Send one outbound text message
    async fn send(&mut self, text: String) -> Result<()>;

    /// Human-readable endpoint for log lines
    fn describe(&self) -> String;
}

/// WebSocket transport over tokio-tungstenite
pub struct WebSocketTransport {
    url: String,
    socket: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            socket: None,
        }
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn connect(&mut self) -> Result<()> {
        match connect_async(self.url.as_str()).await {
            Ok((socket, _response)) => {
                self.socket = Some(socket);
                Ok(())
            }
            Err(WsError::Http(response)) if response.status().is_client_error() => Err(
                GroundStationError::SourceRejected(format!("{} answered HTTP {}", self.url, response.status())),
            ),
            Err(err) => Err(err.into()),
        }
    }

    async fn next_message(&mut self) -> Option<Result<String>> {
        let socket = self.socket.as_mut()?;
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Close(_))) | None => {
                    self.socket = None;
                    return None;
                }
                // Pings are answered by tungstenite; binary frames carry no telemetry
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    self.socket = None;
                    return Some(Err(err.into()));
                }
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        match self.socket.as_mut() {
            Some(socket) => Ok(socket.send(Message::Text(text)).await?),
            None => Err(GroundStationError::UplinkTransportClosed),
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Streaming strategy over one transport
pub struct StreamingSource {
    transport: Option<Box<dyn StreamTransport>>,
    reconnect_backoff: Duration,
    wants_connection: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: Option<mpsc::Receiver<String>>,
}

impl StreamingSource {
    pub fn new(transport: Box<dyn StreamTransport>, reconnect_backoff: Duration) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        Self {
            transport: Some(transport),
            reconnect_backoff,
            wants_connection: Arc::new(AtomicBool::new(false)),
            open: Arc::new(AtomicBool::new(false)),
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        }
    }

    /// Latched "operator wants a connection" flag
    pub fn wants_connection(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.wants_connection)
    }

    /// Whether the socket is currently open
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(super) fn open_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.open)
    }

    pub(super) fn outbound(&self) -> mpsc::Sender<String> {
        self.outbound_tx.clone()
    }

    /// Hand the transport to a worker; a source runs at most once
    pub(super) fn take_worker(&mut self) -> Option<StreamWorker> {
        let transport = self.transport.take()?;
        let outbound = self.outbound_rx.take()?;
        self.wants_connection.store(true, Ordering::SeqCst);
        Some(StreamWorker {
            transport,
            reconnect_backoff: self.reconnect_backoff,
            wants_connection: Arc::clone(&self.wants_connection),
            open: Arc::clone(&self.open),
            outbound,
        })
    }

    /// Clear the latch so no reconnect is attempted
    pub(super) fn release(&self) {
        self.wants_connection.store(false, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }
}

/// State moved into the streaming task
pub struct StreamWorker {
    transport: Box<dyn StreamTransport>,
    reconnect_backoff: Duration,
    wants_connection: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    outbound: mpsc::Receiver<String>,
}

/// Why one connected period ended
enum Closed {
    Lost,
    ReceiverGone,
}

impl StreamWorker {
    /// Task body: connect, pump messages, and retry while the latch is set
    pub async fn run(mut self, events: mpsc::Sender<SourceEvent>) {
        let endpoint = self.transport.describe();

        while self.wants_connection.load(Ordering::SeqCst) {
            if events.send(SourceEvent::Status(ConnectionStatus::Connecting)).await.is_err() {
                return;
            }

            match self.transport.connect().await {
                Ok(()) => {
                    info!("Connected to {}", endpoint);
                    self.open.store(true, Ordering::SeqCst);
                    if events.send(SourceEvent::Status(ConnectionStatus::Connected)).await.is_err() {
                        return;
                    }

                    let closed = self.pump(&events).await;
                    self.open.store(false, Ordering::SeqCst);
                    if let Closed::ReceiverGone = closed {
                        return;
                    }
                    warn!("Connection to {} lost", endpoint);
                }
                Err(GroundStationError::SourceRejected(reason)) => {
                    error!("Connection rejected: {}", reason);
                    self.wants_connection.store(false, Ordering::SeqCst);
                    let _ = events.send(SourceEvent::Status(ConnectionStatus::Rejected(reason))).await;
                    return;
                }
                Err(err) => warn!("Connection to {} failed: {}", endpoint, err),
            }

            if events.send(SourceEvent::Status(ConnectionStatus::Disconnected)).await.is_err() {
                return;
            }
            if !self.wants_connection.load(Ordering::SeqCst) {
                break;
            }
            info!("Reconnecting in {:?}", self.reconnect_backoff);
            tokio::time::sleep(self.reconnect_backoff).await;
        }

        debug!("Streaming worker for {} finished", endpoint);
    }

    /// Handle inbound messages one at a time and forward queued commands
    async fn pump(&mut self, events: &mpsc::Sender<SourceEvent>) -> Closed {
        loop {
            tokio::select! {
                inbound = self.transport.next_message() => {
                    let text = match inbound {
                        Some(Ok(text)) => text,
                        Some(Err(err)) => {
                            warn!("Stream error: {}", err);
                            return Closed::Lost;
                        }
                        None => return Closed::Lost,
                    };

                    let event = match decode_message(&text) {
                        Ok(StreamMessage::Telemetry(decoded)) => SourceEvent::Record(decoded),
                        Ok(StreamMessage::Connected { mission_time }) => {
                            debug!("Server handshake, mission time {:?}", mission_time);
                            continue;
                        }
                        Ok(StreamMessage::Ignored(kind)) => {
                            debug!("Ignoring '{}' message", kind);
                            continue;
                        }
                        Err(err) => SourceEvent::DecodeFailed(err),
                    };
                    if events.send(event).await.is_err() {
                        return Closed::ReceiverGone;
                    }
                }
                Some(command) = self.outbound.recv() => {
                    debug!("Sending command {:?}", command);
                    if let Err(err) = self.transport.send(command).await {
                        warn!("Command send failed: {}", err);
                    }
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::{ConnectOutcome, ScriptedTransport};
    use super::*;

    fn telemetry(packet: u64) -> String {
        format!(
            r#"{{"type":"telemetry","data":{{"TEAM_ID":"1000","MISSION_TIME":"00:00:{:02}","PACKET_COUNT":{},"ALTITUDE":{}.0}}}}"#,
            packet, packet, packet
        )
    }

    async fn next_record(rx: &mut mpsc::Receiver<SourceEvent>) -> u64 {
        loop {
            match rx.recv().await {
                Some(SourceEvent::Record(d)) => return d.record.packet_count,
                Some(_) => continue,
                None => panic!("Channel closed before a record arrived"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_records_and_ignores_handshake() {
        let transport = ScriptedTransport::new(vec![ConnectOutcome::Hold(vec![
            r#"{"type":"connected","missionTime":0}"#.to_string(),
            telemetry(1),
            "not json".to_string(),
            telemetry(2),
        ])]);
        let mut source = StreamingSource::new(Box::new(transport), Duration::from_secs(3));
        let worker = source.take_worker().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(worker.run(tx));

        assert_eq!(rx.recv().await, Some(SourceEvent::Status(ConnectionStatus::Connecting)));
        assert_eq!(rx.recv().await, Some(SourceEvent::Status(ConnectionStatus::Connected)));
        assert_eq!(next_record(&mut rx).await, 1);
        assert!(
            matches!(rx.recv().await, Some(SourceEvent::DecodeFailed(_))),
            "Bad message is reported, not fatal"
        );
        assert_eq!(next_record(&mut rx).await, 2);
        assert!(source.is_open());

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_backoff_while_latched() {
        let transport = ScriptedTransport::new(vec![
            ConnectOutcome::Deliver(vec![telemetry(1)]),
            ConnectOutcome::Fail,
            ConnectOutcome::Hold(vec![telemetry(2)]),
        ]);
        let observer = transport.clone();
        let mut source = StreamingSource::new(Box::new(transport), Duration::from_secs(3));
        let worker = source.take_worker().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let task = tokio::spawn(worker.run(tx));

        assert_eq!(next_record(&mut rx).await, 1);
        assert_eq!(next_record(&mut rx).await, 2);
        assert_eq!(observer.attempts(), 3);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_latch_suppresses_pending_reconnect() {
        let transport = ScriptedTransport::new(vec![ConnectOutcome::Fail]);
        let observer = transport.clone();
        let mut source = StreamingSource::new(Box::new(transport), Duration::from_secs(3));
        let worker = source.take_worker().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let task = tokio::spawn(worker.run(tx));

        // Connecting, then Disconnected after the failed attempt
        assert_eq!(rx.recv().await, Some(SourceEvent::Status(ConnectionStatus::Connecting)));
        assert_eq!(rx.recv().await, Some(SourceEvent::Status(ConnectionStatus::Disconnected)));
        assert_eq!(observer.attempts(), 1);

        // Manual disconnect lands while the worker sleeps out its backoff
        source.release();
        tokio::time::advance(Duration::from_secs(10)).await;

        task.await.unwrap();
        assert_eq!(observer.attempts(), 1, "No reconnect after the latch was cleared");
        assert!(!source.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_terminal() {
        let transport = ScriptedTransport::new(vec![ConnectOutcome::Reject, ConnectOutcome::Hold(vec![])]);
        let observer = transport.clone();
        let mut source = StreamingSource::new(Box::new(transport), Duration::from_secs(3));
        let worker = source.take_worker().unwrap();
        let (tx, mut rx) = mpsc::channel(16);

        worker.run(tx).await;

        assert_eq!(rx.recv().await, Some(SourceEvent::Status(ConnectionStatus::Connecting)));
        assert!(matches!(
            rx.recv().await,
            Some(SourceEvent::Status(ConnectionStatus::Rejected(_)))
        ));
        assert_eq!(observer.attempts(), 1);
        assert!(!source.wants_connection().load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_commands_reach_transport() {
        let transport = ScriptedTransport::new(vec![ConnectOutcome::Hold(vec![])]);
        let observer = transport.clone();
        let mut source = StreamingSource::new(Box::new(transport), Duration::from_secs(3));
        let outbound = source.outbound();
        let worker = source.take_worker().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(worker.run(tx));

        assert_eq!(rx.recv().await, Some(SourceEvent::Status(ConnectionStatus::Connecting)));
        assert_eq!(rx.recv().await, Some(SourceEvent::Status(ConnectionStatus::Connected)));

        outbound.send("CX,ON".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(observer.sent(), vec!["CX,ON".to_string()]);

        task.abort();
    }

    #[test]
    fn test_worker_taken_once() {
        let mut source = StreamingSource::new(Box::new(ScriptedTransport::new(vec![])), Duration::from_secs(3));
        assert!(source.take_worker().is_some());
        assert!(source.take_worker().is_none());
    }
}
