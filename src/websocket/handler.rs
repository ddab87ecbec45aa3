use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::hub::{ClientHandle, Hub, CLIENT_QUEUE_CAPACITY};
use super::messages::{ClientMessage, WsMessage};
use crate::models::Symbol;

/// Probe cadence for idle connections
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// A connection with no inbound frame for this long is considered dead
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// WebSocket connection state shared across handlers
pub struct WsState {
    pub hub: Hub,
}

/// Handle WebSocket upgrade request
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsState>>,
) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Drive one client connection until it closes, times out, or the hub
/// unregisters it
async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let client_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<WsMessage>(CLIENT_QUEUE_CAPACITY);
    let cancel = CancellationToken::new();
    state
        .hub
        .register(client_id, ClientHandle::new(tx, cancel.clone()))
        .await;

    info!(client = %client_id, "websocket client connected");

    let mut keepalive = interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
    let mut read_deadline = Instant::now() + READ_TIMEOUT;

    loop {
        select! {
            // Hub forced this client out; tell the peer and stop.
            _ = cancel.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            // Inbound frames refresh the read deadline.
            msg = receiver.next() => {
                read_deadline = Instant::now() + READ_TIMEOUT;
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, client_id, &state, &mut sender).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(client = %client_id, "close frame received");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(client = %client_id, error = %e, "websocket read error");
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            // Hub-queued messages for this client.
            queued = rx.recv() => {
                match queued {
                    Some(ws_msg) => {
                        let Ok(json) = serde_json::to_string(&ws_msg) else { continue };
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = keepalive.tick() => {
                let Ok(json) = serde_json::to_string(&WsMessage::Keepalive) else { continue };
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }

            _ = sleep_until(read_deadline) => {
                warn!(client = %client_id, "read timeout, closing connection");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    state.hub.unregister(client_id).await;
    info!(client = %client_id, "websocket connection closed");
}

/// Handle subscribe, unsubscribe and keepalive commands
async fn handle_client_message(
    text: &str,
    client_id: Uuid,
    state: &Arc<WsState>,
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
) {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(client = %client_id, error = %e, "malformed client message");
            send_error(sender, "malformed message").await;
            return;
        }
    };

    match &client_msg {
        ClientMessage::Keepalive => {
            if let Ok(json) = serde_json::to_string(&WsMessage::Keepalive) {
                let _ = sender.send(Message::Text(json)).await;
            }
        }
        ClientMessage::Subscribe { .. } | ClientMessage::Unsubscribe { .. } => {
            let subscribe = matches!(client_msg, ClientMessage::Subscribe { .. });
            let requested = client_msg.requested_symbols();
            if requested.is_empty() {
                send_error(sender, "no symbol specified").await;
                return;
            }

            for raw in requested {
                match Symbol::parse(&raw) {
                    Some(symbol) => {
                        if subscribe {
                            state.hub.subscribe(client_id, symbol).await;
                        } else {
                            state.hub.unsubscribe(client_id, symbol).await;
                        }
                    }
                    None => {
                        send_error(sender, format!("unknown symbol: {raw}")).await;
                    }
                }
            }
        }
    }
}

async fn send_error(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    message: impl Into<String>,
) {
    if let Ok(json) = serde_json::to_string(&WsMessage::error(message)) {
        let _ = sender.send(Message::Text(json)).await;
    }
}
