//! WebSocket live feed.
//!
//! Every [`LiveEvent`] is forwarded to each connected client as a JSON text
//! frame, e.g. `{"type":"temp_update","data":{...}}`. On connect the client
//! first receives the latest stored reading as a `temp_update`.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use heatwatch_core::LiveEvent;

use crate::state::AppState;

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serialize a live event into a text frame payload.
pub fn encode(event: &LiveEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "Failed to serialize live event");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing published meanwhile is missed
    let mut rx = state.live.subscribe();
    info!("WebSocket client connected");

    let latest = state.store.lock().await.latest_reading();
    match latest {
        Ok(Some(reading)) => {
            let snapshot = LiveEvent::TempUpdate {
                temperature: reading.temperature,
                humidity: reading.humidity,
                timestamp: reading.captured_at,
            };
            if let Some(json) = encode(&snapshot)
                && sender.send(Message::Text(json.into())).await.is_err()
            {
                info!("WebSocket client disconnected during snapshot");
                return;
            }
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Failed to load snapshot for WebSocket client"),
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let Some(json) = encode(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "WebSocket client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                // Pongs are answered by axum
                Ok(Message::Ping(_)) => debug!("Received ping"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("WebSocket client disconnected");
}
