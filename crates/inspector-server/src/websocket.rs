//! Live watch channel over WebSocket
//!
//! Each connection gets one watch session. A writer task drains the
//! session's outbound queue into the socket; the reader loop feeds inbound
//! text frames to the session until the client goes away or the server
//! shuts down.

use crate::routes::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use inspector::WatchHub;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Query string of the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct WatchParams {
    pub context: Option<String>,
}

/// `GET /api/watch?context=<name>`
pub async fn watch_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WatchParams>,
    State(state): State<AppState>,
) -> Response {
    let hub = state.service.watch_hub();
    ws.on_upgrade(move |socket| serve_socket(socket, hub, params.context))
}

async fn serve_socket(socket: WebSocket, hub: Arc<WatchHub>, context: Option<String>) {
    let (session, mut outbound) = hub.open_session(context).await;
    let id = session.id();
    let (mut sink, mut inbound) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Session {}: failed to encode message: {}", id, e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                debug!("Session {}: client gone, stopping writer", id);
                break;
            }
        }
        if let Err(e) = sink.close().await {
            debug!("Session {}: close frame not sent: {}", id, e);
        }
    });

    loop {
        tokio::select! {
            _ = session.cancelled() => break,
            frame = inbound.next() => match frame {
                Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Session {}: read error: {}", id, e);
                    break;
                }
            },
        }
    }

    hub.close_session(id).await;
    // the writer ends once the session's sender is gone
    drop(session);
    if let Err(e) = writer.await {
        warn!("Session {}: writer task failed: {}", id, e);
    }
    info!("Watch connection {} closed", id);
}
