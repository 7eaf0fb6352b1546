//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{SessionEvent, SessionInput};
use crate::lobby::SessionBinding;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let player_id = Uuid::new_v4();
    info!(player_id = %player_id, "New WebSocket connection");

    let (ws_sink, mut ws_stream) = socket.split();

    // Writer task: session outbound channel -> WebSocket. Ends (and closes
    // the socket) when the session drops its sender.
    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerMsg>(32);
    let writer = tokio::spawn(write_outbound(player_id, ws_sink, outbound_rx));

    // Queue for an opponent
    let mut binding_rx = state.lobby.register(player_id, outbound_tx);

    // Wait for pairing while watching the socket for an early close
    let binding = loop {
        tokio::select! {
            res = &mut binding_rx => match res {
                Ok(binding) => break binding,
                Err(_) => {
                    error!(player_id = %player_id, "Lobby dropped before pairing");
                    let _ = writer.await;
                    return;
                }
            },
            frame = ws_stream.next() => match frame {
                Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                    debug!(player_id = %player_id, "Message before pairing, ignoring");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    state.lobby.unregister(player_id);
                    let _ = writer.await;
                    info!(player_id = %player_id, "WebSocket connection closed");
                    return;
                }
            }
        }
    };

    run_session(player_id, binding, ws_stream).await;

    let _ = writer.await;
    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Reader loop: WebSocket frames -> session inputs
async fn run_session(
    player_id: Uuid,
    binding: SessionBinding,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
) {
    let SessionBinding {
        session_id,
        seat,
        input_tx,
    } = binding;
    let rate_limiter = PlayerRateLimiter::new();

    loop {
        tokio::select! {
            // Session ended (peer disconnect, teardown): release the socket
            _ = input_tx.closed() => {
                debug!(player_id = %player_id, session_id = %session_id, "Session gone, releasing connection");
                break;
            }
            frame = ws_stream.next() => {
                let Some(result) = frame else { break };
                let msg = match result {
                    Ok(Message::Text(text)) => {
                        if !rate_limiter.check_input() {
                            warn!(player_id = %player_id, "Rate limited message");
                            continue;
                        }
                        decode_frame(&text)
                    }
                    Ok(Message::Binary(_)) => ClientMsg::IncorrectRequest {
                        message: "Wrong data type".to_string(),
                    },
                    Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                    Ok(Message::Close(_)) => {
                        info!(player_id = %player_id, "Client initiated close");
                        break;
                    }
                    Err(e) => {
                        error!(player_id = %player_id, error = %e, "WebSocket error");
                        break;
                    }
                };

                let input = SessionInput {
                    seat,
                    event: SessionEvent::Message(msg),
                };
                if input_tx.send(input).await.is_err() {
                    debug!(player_id = %player_id, "Session input channel closed");
                    break;
                }
            }
        }
    }

    // Signal disconnect so the session can abort for the peer
    let _ = input_tx
        .send(SessionInput {
            seat,
            event: SessionEvent::Disconnected,
        })
        .await;
}

/// Decode a text frame into a client message. Frames that fail structural
/// validation become a synthetic `incorrectRequest` so the state machine
/// can echo the error to the sender without mutating anything.
fn decode_frame(text: &str) -> ClientMsg {
    match serde_json::from_str::<ClientMsg>(text) {
        Ok(msg) => msg,
        Err(e) => ClientMsg::IncorrectRequest {
            message: format!("Can't parse JSON data: {e}"),
        },
    }
}

/// Writer task body
async fn write_outbound(
    player_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = outbound_rx.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(player_id = %player_id, error = %e, "WebSocket send failed");
            break;
        }
    }
    let _ = ws_sink.send(Message::Close(None)).await;
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
