use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use escape_shared_types::{ClientToServer, ErrorMsg, HintRequestState, ServerToClient};
use futures::StreamExt;
use tokio::sync::broadcast::error::RecvError;

use crate::AppState;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send(socket: &mut WebSocket, msg: &ServerToClient) -> bool {
    match serde_json::to_string(msg) {
        Ok(txt) => socket.send(Message::Text(txt)).await.is_ok(),
        Err(err) => {
            tracing::warn!(%err, "could not encode server message");
            true
        }
    }
}

fn error(code: &str, msg: impl Into<String>) -> ServerToClient {
    ServerToClient::Error(ErrorMsg { code: code.into(), msg: msg.into() })
}

/// Live feed for one staff device: the whole map on connect and after every
/// change, plus session and hint notices. Staff can resolve hints from here.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut map = state.map.clone();
    let mut events = state.events.subscribe();
    let first = ServerToClient::Map(map.borrow_and_update().clone());
    if !send(&mut socket, &first).await {
        return;
    }

    loop {
        let outgoing = tokio::select! {
            changed = map.changed() => {
                if changed.is_err() {
                    tracing::warn!("room map closed, dropping live client");
                    break;
                }
                ServerToClient::Map(map.borrow_and_update().clone())
            }
            event = events.recv() => match event {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "live client fell behind on notices");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.next() => {
                let Some(Ok(msg)) = incoming else { break };
                match msg {
                    Message::Text(txt) => match handle_client(&state, &txt).await {
                        Some(reply) => reply,
                        None => continue,
                    },
                    Message::Binary(_) => error("UNSUPPORTED", "binary not supported"),
                    Message::Close(_) => break,
                    Message::Ping(p) => {
                        let _ = socket.send(Message::Pong(p)).await;
                        continue;
                    }
                    Message::Pong(_) => continue,
                }
            }
        };
        if !send(&mut socket, &outgoing).await {
            break;
        }
    }
    tracing::debug!("live client gone");
}

/// Reply for a client message, if it needs one. Hint resolutions are
/// announced to every client through the notice channel instead.
async fn handle_client(state: &AppState, txt: &str) -> Option<ServerToClient> {
    let (request_id, decision) = match serde_json::from_str::<ClientToServer>(txt) {
        Ok(ClientToServer::Heartbeat(_)) => return Some(error("OK", "pong")),
        Ok(ClientToServer::ApproveHint(d)) => (d.request_id, HintRequestState::Approved),
        Ok(ClientToServer::DeclineHint(d)) => (d.request_id, HintRequestState::Declined),
        Err(err) => {
            tracing::warn!(%err, "failed to parse client message");
            return Some(error("BAD_REQUEST", "invalid message"));
        }
    };
    match state.resolve_hint(&request_id, decision).await {
        Ok(()) => None,
        Err(err) => Some(ServerToClient::Error(err.to_msg())),
    }
}
