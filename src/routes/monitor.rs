//! # routes::monitor
//!
//! | Method   | Path          | Description                       |
//! |----------|---------------|-----------------------------------|
//! | GET (WS) | `/ws/monitor` | Real-time event stream            |
//! | GET      | `/api/health` | Agent, rotation, tick, trade stats |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, info};

use crate::{events::WsEvent, state::SharedState};

// ─── WebSocket Handler ────────────────────────────────────────────────────────

/// Upgrade to WebSocket and forward every broadcast event as a text frame.
pub async fn ws_monitor(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let mut rx = state.broadcast_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!("🔌 WebSocket client connected");

    // ── Snapshot on connect ───────────────────────────────────────────────────
    let snapshot = {
        let stats  = state.scheduler.stats().await;
        let agents = state.scheduler.list().await;

        json!({
            "event":      "SNAPSHOT",
            "agents":     agents,
            "running":    stats.running,
            "tickCount":  stats.tick_count,
            "tradeCount": stats.trade_count,
        })
        .to_string()
    };

    if sender.send(Message::Text(snapshot.into())).await.is_err() {
        return;
    }

    // ── Event Loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(json_str) => {
                        if sender.send(Message::Text(json_str.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("WS client lagged, skipped {n} events");
                    }
                    Err(_) => break,
                }
            }

            result = receiver.next() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("🔌 WebSocket client disconnected");
}

// ─── Health ───────────────────────────────────────────────────────────────────

/// GET /api/health, also pushes a `SERVER_STATS` event to monitors.
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let stats = state.scheduler.stats().await;

    state.broadcast(&WsEvent::ServerStats {
        agents:      stats.agents,
        running:     stats.running,
        tick_count:  stats.tick_count,
        trade_count: stats.trade_count,
    });

    Json(json!({
        "ok":               true,
        "status":           "healthy",
        "agents":           stats.agents,
        "running":          stats.running,
        "tickCount":        stats.tick_count,
        "tradeCount":       stats.trade_count,
        "uptimeSecs":       (Utc::now() - state.started_at).num_seconds(),
        "tickIntervalSecs": state.config.tick_interval.as_secs(),
    }))
}
