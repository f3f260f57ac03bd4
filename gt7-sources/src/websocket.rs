//! WebSocket client for the bridge server
//!
//! Connects to `ws://<server>/ws/telemetry`, sends the PlayStation address as
//! the first text frame, then turns every JSON text frame into a snapshot.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use gt7_core::{SourceCallbacks, TelemetrySnapshot, TelemetrySource, TransportError};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on the handshake
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Path of the telemetry endpoint on the bridge server
pub const TELEMETRY_PATH: &str = "/ws/telemetry";

/// Control frames share the text channel with snapshots
#[derive(Deserialize)]
struct ControlFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<String>,
}

enum Frame {
    Heartbeat,
    ServerError(String),
    Snapshot(TelemetrySnapshot),
}

fn classify(text: &str) -> Result<Frame, gt7_core::SnapshotError> {
    if let Ok(control) = serde_json::from_str::<ControlFrame>(text) {
        match control.kind.as_str() {
            "heartbeat" => return Ok(Frame::Heartbeat),
            "error" => return Ok(Frame::ServerError(control.message.unwrap_or_default())),
            _ => {}
        }
    }
    TelemetrySnapshot::from_json(text).map(Frame::Snapshot)
}

type CallbackSlot = Arc<Mutex<Option<SourceCallbacks>>>;

struct Connection {
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    callbacks: CallbackSlot,
}

/// Ends the in-flight attempt when `connect` returns by any path
struct ConnectingGuard<'a>(&'a WebSocketConnection);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.attempt.lock().take();
        self.0.connecting.store(false, Ordering::SeqCst);
    }
}

/// [`TelemetrySource`] reading from the bridge server
pub struct WebSocketConnection {
    server: String,
    connecting: AtomicBool,
    /// Cancelled by `disconnect` while a handshake is pending
    attempt: Mutex<Option<CancellationToken>>,
    connected: Arc<AtomicBool>,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl WebSocketConnection {
    /// `server` is `host:port` of the bridge, e.g. `localhost:8000`
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            connecting: AtomicBool::new(false),
            attempt: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            connection: tokio::sync::Mutex::new(None),
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}{}", self.server, TELEMETRY_PATH)
    }

    async fn close_connection(&self) {
        let Some(connection) = self.connection.lock().await.take() else {
            return;
        };

        // Deregister first so the reader cannot deliver after this point
        let callbacks = connection.callbacks.lock().take();
        connection.cancel.cancel();
        if let Err(e) = connection.reader.await {
            warn!(error = %e, "websocket reader task failed");
        }
        self.connected.store(false, Ordering::SeqCst);

        if let Some(callbacks) = callbacks {
            callbacks.status(false);
            callbacks.snapshot(None);
        }
        info!(server = %self.server, "disconnected from telemetry server");
    }
}

#[async_trait]
impl TelemetrySource for WebSocketConnection {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn connect(
        &self,
        address: &str,
        callbacks: SourceCallbacks,
    ) -> Result<(), TransportError> {
        if self.connecting.swap(true, Ordering::SeqCst) {
            debug!("connect already in progress, ignoring");
            return Ok(());
        }
        let _guard = ConnectingGuard(self);
        let attempt = CancellationToken::new();
        *self.attempt.lock() = Some(attempt.clone());

        self.close_connection().await;

        if self.server.trim().is_empty() {
            return Err(TransportError::InvalidAddress(self.server.clone()));
        }

        let url = self.url();
        debug!(%url, "connecting to telemetry server");

        let fail = |err: TransportError| {
            callbacks.status(false);
            callbacks.snapshot(None);
            err
        };

        let handshake = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()));
        let stream = tokio::select! {
            _ = attempt.cancelled() => {
                debug!(%url, "connect abandoned by disconnect");
                return Err(TransportError::Closed);
            }
            result = handshake => match result {
                Err(_) => return Err(fail(TransportError::Timeout(CONNECT_TIMEOUT))),
                Ok(Err(e)) => return Err(fail(TransportError::Handshake(e.to_string()))),
                Ok(Ok((stream, _response))) => stream,
            },
        };

        let (mut write, mut read) = stream.split();
        let sent = tokio::select! {
            _ = attempt.cancelled() => return Err(TransportError::Closed),
            sent = write.send(Message::Text(address.to_string())) => sent,
        };
        if let Err(e) = sent {
            return Err(fail(TransportError::Handshake(e.to_string())));
        }

        // disconnect cancels before it takes this lock, so the check below
        // either sees the cancellation or leaves a connection for it to close
        let mut installed = self.connection.lock().await;
        if attempt.is_cancelled() {
            debug!(%url, "connect abandoned by disconnect");
            return Err(TransportError::Closed);
        }

        self.connected.store(true, Ordering::SeqCst);
        callbacks.status(true);
        info!(%url, address, "connected to telemetry server");

        let slot: CallbackSlot = Arc::new(Mutex::new(Some(callbacks)));
        let cancel = CancellationToken::new();

        let reader_slot = slot.clone();
        let token = cancel.clone();
        let connected = self.connected.clone();
        let reader = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = token.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        return;
                    }
                    message = read.next() => message,
                };

                match message {
                    Some(Ok(Message::Text(text))) => match classify(&text) {
                        Ok(Frame::Heartbeat) => {}
                        Ok(Frame::ServerError(message)) => {
                            warn!(%message, "telemetry server reported an error")
                        }
                        Ok(Frame::Snapshot(snapshot)) => {
                            if let Some(callbacks) = reader_slot.lock().as_ref() {
                                callbacks.snapshot(Some(snapshot));
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping malformed frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("telemetry server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                }
            }

            connected.store(false, Ordering::SeqCst);
            if let Some(callbacks) = reader_slot.lock().take() {
                callbacks.status(false);
                callbacks.snapshot(None);
            }
        });

        *installed = Some(Connection {
            cancel,
            reader,
            callbacks: slot,
        });
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(attempt) = self.attempt.lock().as_ref() {
            attempt.cancel();
        }
        self.close_connection().await;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_frames_are_filtered() {
        assert!(matches!(classify(r#"{"type":"heartbeat"}"#), Ok(Frame::Heartbeat)));
        assert!(matches!(
            classify(r#"{"type":"error","message":"Invalid IP address format"}"#),
            Ok(Frame::ServerError(m)) if m == "Invalid IP address format"
        ));
    }

    #[test]
    fn test_snapshot_frames_parse() {
        match classify(r#"{"current_lap": 2, "fuel_percentage": 50.0}"#) {
            Ok(Frame::Snapshot(s)) => assert_eq!(s.current_lap, 2),
            _ => panic!("expected a snapshot"),
        }
        assert!(classify("[]").is_err());
    }

    #[test]
    fn test_url() {
        let ws = WebSocketConnection::new("localhost:8000");
        assert_eq!(ws.url(), "ws://localhost:8000/ws/telemetry");
        assert!(!ws.is_connected());
    }
}
