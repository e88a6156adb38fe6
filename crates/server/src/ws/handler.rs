// WebSocket endpoint: handshake, then one writer and one reader task
// per connection, linked by a cancellation token so either side's exit
// tears the whole session down.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use teamline_common::protocol::ws::{decode_frame, encode_frame, Frame};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use super::hub::{Hub, PingTick, MAX_FRAME_BYTES, PING_INTERVAL};
use crate::auth::jwt::TokenService;

#[derive(Clone)]
pub struct WsState {
    pub hub: Hub,
    pub tokens: Arc<TokenService>,
}

pub fn router(hub: Hub, tokens: Arc<TokenService>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(WsState { hub, tokens })
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    jwt: Option<String>,
}

async fn ws_upgrade(
    State(state): State<WsState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Origin policy accepts any origin; auth happens via the jwt query
    // parameter after the upgrade.
    ws.max_message_size(MAX_FRAME_BYTES)
        .max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(state, socket, query.jwt))
}

async fn handle_socket(state: WsState, mut socket: WebSocket, jwt: Option<String>) {
    let Some(token) = jwt.filter(|token| !token.is_empty()) else {
        reject(&mut socket, "jwt is required").await;
        return;
    };

    let claims = match state.tokens.verify(&token) {
        Ok(claims) => claims,
        Err(_) => {
            reject(&mut socket, "invalid token").await;
            return;
        }
    };

    if claims.is_expired_at(Utc::now()) {
        reject(&mut socket, "invalid token").await;
        return;
    }

    let user_id = match claims.subject() {
        Ok(user_id) => user_id,
        Err(_) => {
            reject(&mut socket, "invalid user_id").await;
            return;
        }
    };

    let (writer_rx, epoch) = state.hub.register(user_id, claims.expires_at());
    let cancel = CancellationToken::new();
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(writer_loop(
        state.hub.clone(),
        user_id,
        epoch,
        sink,
        writer_rx,
        cancel.clone(),
    ));
    let reader = tokio::spawn(reader_loop(state.hub.clone(), user_id, stream, cancel));

    let _ = writer.await;
    let _ = reader.await;

    state.hub.remove_session(user_id, epoch);
}

/// One `error` frame, then a normal closure.
async fn reject(socket: &mut WebSocket, reason: &str) {
    if let Ok(text) = encode_frame(&Frame::error(reason)) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: reason.to_string().into(),
        })))
        .await;
}

/// Drains the session's writer channel onto the socket and drives the
/// ping/pong liveness check. This task is the only writer to the
/// socket.
async fn writer_loop(
    hub: Hub,
    user_id: Uuid,
    epoch: u64,
    mut sink: SplitSink<WebSocket, Message>,
    mut writer_rx: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.reset(); // skip the immediate first tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = writer_rx.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                if send_frame(&mut sink, &frame).await.is_err() {
                    error!(user_id = %user_id, "failed to send frame");
                    break;
                }
            }
            _ = ping.tick() => {
                match hub.ping_tick(user_id, epoch) {
                    PingTick::Close => break,
                    PingTick::SendPing => {
                        if send_frame(&mut sink, &Frame::Ping).await.is_err() {
                            error!(user_id = %user_id, "failed to send ping");
                            break;
                        }
                    }
                }
            }
        }
    }

    cancel.cancel();
}

async fn send_frame(sink: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<(), ()> {
    let text = encode_frame(frame).map_err(|_| ())?;
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// Reads inbound frames and dispatches by type. A socket error or an
/// undecodable frame tears the session down; a failed room join only
/// produces an `error` frame.
async fn reader_loop(
    hub: Hub,
    user_id: Uuid,
    mut stream: SplitStream<WebSocket>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.next() => message,
        };

        let Some(Ok(message)) = message else {
            break;
        };

        match message {
            Message::Text(text) => {
                let frame = match decode_frame(&text) {
                    Ok(frame) => frame,
                    Err(decode_error) => {
                        warn!(user_id = %user_id, error = %decode_error, "failed to read frame");
                        break;
                    }
                };

                match frame {
                    Frame::Pong => hub.pong_received(user_id),
                    Frame::Ping => hub.enqueue_frame(user_id, Frame::Pong),
                    Frame::ConnectUserToRoom { data } => {
                        if let Err(join_error) =
                            hub.connect_user_to_room(user_id, data.room_id, data.kind).await
                        {
                            hub.enqueue_frame(user_id, Frame::error(join_error.public_message()));
                        }
                    }
                    Frame::DisconnectUserFromRoom { data } => {
                        hub.disconnect_user_from_room(user_id, data.room_id);
                    }
                    // Outbound-only frame types arriving inbound are ignored.
                    _ => {}
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    cancel.cancel();
}
