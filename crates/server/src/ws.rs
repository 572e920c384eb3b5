//! WebSocket endpoint connecting sessions to the relay.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use pa_shared::{frame_type, ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::registry::ConnectionId;
use crate::relay::{RelayEvent, RelayHandle};
use crate::state::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.relay))
}

/// Pump one connection until either side closes it.
async fn handle_socket(socket: WebSocket, relay: RelayHandle) {
    let (mut sender, mut receiver) = socket.split();
    let conn_id = Uuid::new_v4();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<ServerMessage>();

    relay.joined(conn_id, outbox);

    // Task to forward queued frames to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            let json = match msg.encode() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(%conn_id, error = %e, "failed to encode frame");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Main receive loop
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_frame(&text, conn_id, &relay),
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "socket read failed");
                break;
            }
            _ => {}
        }
    }

    // Cleanup
    relay.left(conn_id);
    send_task.abort();
}

fn handle_frame(text: &str, conn_id: ConnectionId, relay: &RelayHandle) {
    match ClientMessage::decode(text) {
        Ok(ClientMessage::Broadcast(announcement)) => relay.send(RelayEvent::Broadcast {
            from: conn_id,
            announcement,
        }),
        Ok(ClientMessage::RequestClientsCount) => {
            relay.send(RelayEvent::RequestClientsCount { from: conn_id })
        }
        Err(e) if frame_type(text).as_deref() == Some("broadcast") => {
            relay.send(RelayEvent::MalformedBroadcast {
                from: conn_id,
                reason: e.to_string(),
            })
        }
        Err(e) => tracing::debug!(%conn_id, error = %e, "ignoring unrecognised frame"),
    }
}
