use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use coda_core::config::CLIENT_SEND_TIMEOUT_SECS;
use coda_events::{ClientFrame, ReplayFrame};

use crate::app::AppState;

/// Axum handler — upgrades HTTP to WebSocket at GET /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_connection(socket, state))
}

/// Per-connection task — lives for the entire observer session.
///
/// Delivery order: the replay backlog as one message, then the live
/// stream. A failed or timed-out send drops this observer only; a lagged
/// broadcast receiver silently skips the oldest frames.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = Uuid::new_v4().to_string();
    let send_timeout = Duration::from_secs(CLIENT_SEND_TIMEOUT_SECS);

    let (mut tx, mut rx) = socket.split();
    let mut broadcast_rx = state.fanout.subscribe();

    // Replay precedes any live event for this observer.
    let replay = ReplayFrame::new(state.fanout.replay_snapshot());
    let replay_json = match serde_json::to_string(&replay) {
        Ok(json) => json,
        Err(e) => {
            warn!(conn_id, error = %e, "cannot serialize replay frame");
            return;
        }
    };
    if send_with_timeout(&mut tx, replay_json, send_timeout)
        .await
        .is_err()
    {
        debug!(conn_id, "client dropped during replay delivery");
        return;
    }

    state.fanout.client_connected(&conn_id);

    loop {
        tokio::select! {
            // client sent us something
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => state.orchestrator.handle_client_frame(frame),
                            Err(e) => warn!(conn_id, error = %e, "malformed client frame, ignoring"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(conn_id, error = %e, "client read error");
                        break;
                    }
                    _ => {}
                }
            }

            // broadcast event → forward to this observer
            event = broadcast_rx.recv() => {
                match event {
                    Ok(json) => {
                        if send_with_timeout(&mut tx, json, send_timeout).await.is_err() {
                            debug!(conn_id, "send failed, dropping observer");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(conn_id, skipped, "observer lagged, oldest events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    state.fanout.client_disconnected(&conn_id);
    info!(conn_id, "observer connection closed");
}

async fn send_with_timeout(
    tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    json: String,
    timeout: Duration,
) -> Result<(), ()> {
    match tokio::time::timeout(timeout, tx.send(Message::Text(json.into()))).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}
