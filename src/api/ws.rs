// =============================================================================
// WebSocket state feed
// =============================================================================
//
// Dashboard clients subscribe here and receive engine-event envelopes as
// JSON, plus a periodic status frame keyed by the state version so clients
// can detect missed updates. Transport internals beyond this thin feed are
// out of scope for the engine core.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};

use crate::app_state::EngineContext;

/// Cadence of the periodic status frame.
const STATUS_FRAME_INTERVAL_SECS: u64 = 5;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<EngineContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(socket: WebSocket, ctx: Arc<EngineContext>) {
    info!("ws client connected");
    let (mut sender, mut receiver) = socket.split();
    let mut events = ctx.bus.subscribe();
    let mut status_ticker = tokio::time::interval(tokio::time::Duration::from_secs(
        STATUS_FRAME_INTERVAL_SECS,
    ));
    let mut last_version = 0u64;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(text) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "ws client lagged behind the bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = status_ticker.tick() => {
                let version = ctx.current_state_version();
                if version == last_version {
                    continue;
                }
                last_version = version;
                let status = ctx.build_status();
                let frame = serde_json::json!({ "type": "status", "payload": status });
                let Ok(text) = serde_json::to_string(&frame) else {
                    continue;
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    info!("ws client disconnected");
}
