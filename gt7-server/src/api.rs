//! HTTP and WebSocket routes

use crate::state::AppState;
use crate::udp::Gt7Reader;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use gt7_core::{validate_ps_ip, TelemetrySnapshot};
use gt7_sources::MockTelemetryGenerator;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

/// First-frame value selecting the mock generator instead of a console
pub const DEMO_ADDRESS: &str = "demo";

const SNAPSHOT_BUFFER: usize = 64;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/ws/telemetry", get(telemetry_ws))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// === Health ===

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    connections: usize,
    timestamp: String,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.connection_count(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

// === Telemetry WebSocket ===

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlFrame {
    Heartbeat { timestamp: String },
    Error { message: String },
}

impl ControlFrame {
    fn heartbeat() -> Self {
        ControlFrame::Heartbeat {
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn into_message(self) -> Option<Message> {
        serde_json::to_string(&self).ok().map(Message::Text)
    }
}

async fn telemetry_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Where a connection's snapshots come from; dropped when the socket closes
enum Feed {
    Demo(Arc<MockTelemetryGenerator>),
    Console,
}

async fn start_feed(
    address: &str,
    state: &AppState,
    tx: mpsc::Sender<TelemetrySnapshot>,
    cancel: &CancellationToken,
) -> Result<Feed, String> {
    if address.eq_ignore_ascii_case(DEMO_ADDRESS) {
        let generator = Arc::new(MockTelemetryGenerator::new());
        generator.subscribe(move |snapshot| {
            // Slow clients lose snapshots rather than stall the generator
            let _ = tx.try_send(snapshot);
        });
        generator.start();
        info!("streaming demo telemetry");
        return Ok(Feed::Demo(generator));
    }

    let ps_ip = validate_ps_ip(address).map_err(|e| e.to_string())?;
    let reader = Gt7Reader::bind(ps_ip, &state.config)
        .await
        .map_err(|e| format!("failed to open GT7 UDP socket: {}", e))?
        .with_cars(state.cars.clone());
    info!(%ps_ip, "new telemetry connection");

    let token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = reader.run(tx, token).await {
            error!(error = %e, "GT7 reader failed");
        }
    });
    Ok(Feed::Console)
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _connection = state.track_connection();
    let (mut sender, mut receiver) = socket.split();

    // The first text frame names the console, or "demo"
    let address = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => break text.trim().to_string(),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
            Some(Ok(_)) => continue,
        }
    };

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(SNAPSHOT_BUFFER);
    let feed = match start_feed(&address, &state, tx, &cancel).await {
        Ok(feed) => feed,
        Err(message) => {
            warn!(%address, %message, "rejecting telemetry connection");
            if let Some(frame) = (ControlFrame::Error { message }).into_message() {
                let _ = sender.send(frame).await;
            }
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let period = state.config.ws_heartbeat_interval();
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            snapshot = rx.recv() => {
                let Some(snapshot) = snapshot else {
                    debug!("telemetry feed ended");
                    break;
                };
                let text = match serde_json::to_string(&snapshot) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(error = %e, "failed to serialize snapshot");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if let Some(frame) = ControlFrame::heartbeat().into_message() {
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
            }
            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "websocket receive error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    cancel.cancel();
    if let Feed::Demo(generator) = feed {
        generator.stop();
    }
    info!(%address, "telemetry connection closed");
}
