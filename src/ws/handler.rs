//! WebSocket upgrade and connection session handling

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{RoomCommand, RoomHandle, RoomMsg, RoomRegistry};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler. Connections are anonymous; each gets a
/// generated connection id used as its opaque handle within rooms.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    info!(conn_id = %conn_id, "New WebSocket connection");

    run_session(conn_id, socket, state.rooms.clone()).await;

    info!(conn_id = %conn_id, "WebSocket connection closed");
}

/// Drive one connection: client messages in, room events out.
///
/// A single select loop owns both halves of the socket so a later
/// `JoinRoom` can swap the subscribed room without re-plumbing tasks.
async fn run_session(conn_id: Uuid, socket: WebSocket, registry: Arc<RoomRegistry>) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let rate_limiter = ConnectionRateLimiter::new();

    let mut room: Option<RoomHandle> = None;
    let mut events_rx: Option<broadcast::Receiver<RoomMsg>> = None;

    loop {
        tokio::select! {
            incoming = ws_stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !rate_limiter.check_command() {
                            warn!(conn_id = %conn_id, "Rate limited command message");
                            continue;
                        }

                        let msg = match serde_json::from_str::<ClientMsg>(&text) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!(conn_id = %conn_id, error = %e, "Failed to parse client message");
                                continue;
                            }
                        };

                        match msg {
                            ClientMsg::Ping { t } => {
                                // Answered here so latency checks work before any join
                                if send_msg(&mut ws_sink, &ServerMsg::Pong { t }).await.is_err() {
                                    break;
                                }
                            }
                            ClientMsg::JoinRoom { room_id } => {
                                // Joining a new room implicitly leaves the old one
                                if let Some(prev) = room.take() {
                                    send_command(&prev, conn_id, ClientMsg::Disconnect).await;
                                }

                                let handle = registry.join_or_create(room_id);
                                // Subscribe before the join command so the
                                // targeted JoinedRoom reply is not missed
                                events_rx = Some(handle.events_tx.subscribe());
                                send_command(&handle, conn_id, ClientMsg::JoinRoom { room_id: None }).await;
                                room = Some(handle);
                            }
                            other => {
                                if let Some(handle) = room.as_ref() {
                                    send_command(handle, conn_id, other).await;
                                } else {
                                    debug!(conn_id = %conn_id, "Command before joining a room, dropped");
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!(conn_id = %conn_id, "Received binary message, ignoring");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!(conn_id = %conn_id, "Client initiated close");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(conn_id = %conn_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                }
            }

            event = next_room_event(&mut events_rx) => {
                match event {
                    Ok(RoomMsg { target, msg }) => {
                        if target.is_none() || target == Some(conn_id) {
                            if send_msg(&mut ws_sink, &msg).await.is_err() {
                                debug!(conn_id = %conn_id, "WebSocket send failed");
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(conn_id = %conn_id, lagged_count = n, "Client lagged, skipping {} events", n);
                        // Keep going; clients resynchronize from the next snapshot
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(conn_id = %conn_id, "Room event channel closed");
                        events_rx = None;
                        room = None;
                    }
                }
            }
        }
    }

    // Signal the disconnect to the joined room
    if let Some(handle) = room {
        send_command(&handle, conn_id, ClientMsg::Disconnect).await;
    }
}

/// Receive the next event from the joined room, pending forever when
/// no room is joined yet
async fn next_room_event(
    rx: &mut Option<broadcast::Receiver<RoomMsg>>,
) -> Result<RoomMsg, broadcast::error::RecvError> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_command(handle: &RoomHandle, conn_id: Uuid, msg: ClientMsg) {
    let command = RoomCommand {
        conn_id,
        msg,
        received_at: unix_millis(),
    };
    if handle.command_tx.send(command).await.is_err() {
        debug!(conn_id = %conn_id, room_id = %handle.id, "Room command channel closed");
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
