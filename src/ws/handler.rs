//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::RoomInput;
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Room identifier; rooms are created on first connect
    pub room: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query.room, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, room_id: String, state: AppState) {
    let session_id = Uuid::new_v4();
    info!(session_id = %session_id, room = %room_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Send welcome message before the writer task takes the sink
    let welcome = ServerMsg::Welcome {
        session_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(session_id = %session_id, error = %e, "Failed to send welcome");
        return;
    }

    // Attach to the room; its task owns all simulation state
    let room = state.rooms.get_or_create(&room_id);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMsg>();

    if room
        .input_tx
        .send(RoomInput::Connect {
            session_id,
            tx: out_tx,
        })
        .await
        .is_err()
    {
        error!(session_id = %session_id, room = %room_id, "Room task unavailable");
        return;
    }

    // Writer task: room broadcasts -> WebSocket
    let writer_session_id = session_id;
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(session_id = %writer_session_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> room task
    let rate_limiter = SessionRateLimiter::new();
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(session_id = %session_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => {
                        if matches!(client_msg, ClientMsg::Chat { .. })
                            && !rate_limiter.check_chat()
                        {
                            warn!(session_id = %session_id, "Rate limited chat message");
                            continue;
                        }

                        let leaving = matches!(client_msg, ClientMsg::Leave);
                        let input = RoomInput::Command {
                            session_id,
                            msg: client_msg,
                        };
                        if room.input_tx.send(input).await.is_err() {
                            debug!(session_id = %session_id, "Room input channel closed");
                            break;
                        }
                        if leaving {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(session_id = %session_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                debug!(session_id = %session_id, "WebSocket keepalive");
            }
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Signal disconnect to the room task
    let _ = room
        .input_tx
        .send(RoomInput::Disconnect { session_id })
        .await;

    writer_handle.abort();
    info!(session_id = %session_id, room = %room_id, "WebSocket connection closed");
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
