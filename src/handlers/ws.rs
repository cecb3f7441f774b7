//! The connection event stream: one WebSocket per participant.
//!
//! Each connection gets an opaque `ConnId` and a bounded outbox. A writer
//! task drains the outbox onto the socket; the read loop parses tagged
//! `ClientEvent` payloads and feeds them to the broker. When the socket
//! goes away the broker reaps every session the connection held.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::AppState;
use crate::error::BrokerError;
use crate::events::{ClientEvent, ServerEvent};
use crate::models::ConnId;

/// GET /ws
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn = ConnId::new();
    let (outbox, mut inbox) = mpsc::channel::<ServerEvent>(state.config.outbox_capacity);
    let (mut sink, mut stream) = socket.split();

    info!("connection {} opened", conn);

    let writer = tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        let payload = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol.
            _ => continue,
        };

        process_frame(&state, conn, payload.as_str(), &outbox).await;
    }

    state.broker.disconnect(conn).await;
    writer.abort();
    info!("connection {} closed", conn);
}

/// Parse one inbound frame and run it through the broker. Any failure is
/// answered on the originating connection's outbox only: parse failures as
/// an `error` event, a taken username as `username_taken`, everything else
/// as `error`.
async fn process_frame(
    state: &AppState,
    conn: ConnId,
    payload: &str,
    outbox: &mpsc::Sender<ServerEvent>,
) {
    let event = match serde_json::from_str::<ClientEvent>(payload) {
        Ok(event) => event,
        Err(e) => {
            debug!("connection {} sent a malformed event: {}", conn, e);
            let _ = outbox.try_send(ServerEvent::Error {
                message: format!("malformed event: {}", e),
            });
            return;
        }
    };

    if let Err(err) = dispatch(state, conn, event, outbox).await {
        let reply = match err {
            BrokerError::UsernameTaken(_) => ServerEvent::UsernameTaken {
                message: err.to_string(),
            },
            other => ServerEvent::Error {
                message: other.to_string(),
            },
        };
        let _ = outbox.try_send(reply);
    }
}

async fn dispatch(
    state: &AppState,
    conn: ConnId,
    event: ClientEvent,
    outbox: &mpsc::Sender<ServerEvent>,
) -> Result<(), BrokerError> {
    match event {
        ClientEvent::Join { room, username } => {
            state.broker.join(&room, conn, &username, outbox.clone()).await
        }
        ClientEvent::Leave { room } => {
            state.broker.leave(&room, conn).await;
            Ok(())
        }
        ClientEvent::Message { room, body } => state.broker.send(&room, conn, body).await,
        ClientEvent::FileShared { room, file_info } => {
            state.broker.share_file(&room, conn, file_info).await
        }
    }
}
