//! WebSocket endpoint: `/ws?token=JWT`.
//!
//! An invalid token closes the socket with the policy-violation code
//! (1008). After registration the client drives its subscription set
//! with `{"type":"subscribe","symbols":[...]}` and keeps the connection
//! alive with `{"type":"ping"}`.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use fxgate_core::Symbol;

use crate::server::AppState;

/// WS close code for policy violations (RFC 6455).
const CLOSE_POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Inbound client messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Subscribe { symbols: Vec<String> },
    Ping,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let claims = match token
        .as_deref()
        .ok_or_else(|| crate::HubError::InvalidToken("missing token".to_string()))
        .and_then(|t| state.validator.validate(t))
    {
        Ok(claims) => claims,
        Err(e) => {
            warn!(?e, "WebSocket auth failed, closing 1008");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: "unauthorized".into(),
                })))
                .await;
            return;
        }
    };

    let (client_id, mut frames) = state.hub.register(claims.sub);
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => {
                match frame {
                    Some(frame) => {
                        if sender.send(Message::Text(frame.into())).await.is_err() {
                            debug!(client_id, "Send failed, client gone");
                            break;
                        }
                    }
                    None => break,
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&state, client_id, &text, &mut sender).await;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Pong handled by axum.
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(client_id, "Client closed");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(client_id, ?e, "WebSocket receive error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.hub.unregister(client_id);
}

async fn handle_client_message(
    state: &AppState,
    client_id: u64,
    text: &str,
    sender: &mut (impl SinkExt<Message> + Unpin),
) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { symbols }) => {
            let parsed: Vec<Symbol> = symbols
                .iter()
                .filter_map(|s| match Symbol::parse(s) {
                    Ok(symbol) => Some(symbol),
                    Err(e) => {
                        debug!(client_id, symbol = %s, ?e, "Ignoring invalid symbol");
                        None
                    }
                })
                .collect();
            state.hub.subscribe(client_id, parsed);
        }
        Ok(ClientMessage::Ping) => {
            let _ = sender
                .send(Message::Text(r#"{"type":"pong"}"#.into()))
                .await;
        }
        Err(e) => {
            debug!(client_id, ?e, "Unparseable client message ignored");
        }
    }
}
