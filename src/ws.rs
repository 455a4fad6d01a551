use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::llm::ChatEntry;
use crate::protocol::{ClientFrame, ServerMessage};
use crate::registry::{ChatRegistry, ConnectionId};
use crate::state::{AppState, ChatMode};

pub async fn chat_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One task per connection: register, greet, then pump frames until the
/// transport closes or errors. Any exit path deregisters.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let id = ChatRegistry::new_id();
    let username = guest_name();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    state
        .registry
        .register(&id, outbound_tx, username.clone())
        .await;
    tracing::info!("connection {} ({}) opened", id, username);

    let greeting = match state.config.mode {
        ChatMode::Assistant => format!("Connected. You are chatting with {}.", state.llm.model()),
        ChatMode::Broadcast => format!("Connected as {}.", username),
    };
    if let Ok(json) = serde_json::to_string(&ServerMessage::system(greeting)) {
        if sender.send(Message::Text(json.into())).await.is_err() {
            state.registry.deregister(&id).await;
            return;
        }
    }

    loop {
        tokio::select! {
            // Payloads relayed from peers via the registry
            relayed = outbound_rx.recv() => {
                match relayed {
                    Some(payload) => {
                        if sender.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(response) = handle_frame(&state, &id, &text).await {
                            if let Ok(json) = serde_json::to_string(&response) {
                                if sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        // Any transport fault is treated as a disconnect
                        tracing::debug!("connection {} transport error: {}", id, e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.registry.deregister(&id).await;
    tracing::info!("connection {} closed", id);
}

/// Route one inbound frame.
///
/// Returns the frame to send back on the same connection, if any;
/// broadcast-mode relays go to peers through the registry instead.
pub async fn handle_frame(
    state: &AppState,
    id: &ConnectionId,
    raw: &str,
) -> Option<ServerMessage> {
    let frame = ClientFrame::parse(raw);

    if let Some(username) = frame.username.as_deref() {
        if !username.is_empty() {
            state.registry.set_username(id, username.to_string()).await;
        }
    }

    // Presence frames and empty messages produce no dispatch and no history
    if frame.is_presence() || frame.text.is_empty() {
        return None;
    }

    match state.config.mode {
        ChatMode::Broadcast => {
            state.registry.broadcast(id, raw).await;
            None
        }
        ChatMode::Assistant => {
            // Snapshot first: the request carries the prior turns only, the
            // inference client appends the new message itself.
            let history = state.registry.history(id).await;
            state
                .registry
                .append_history(id, ChatEntry::user(frame.text.clone()))
                .await;

            // No registry lock is held across the inference call.
            let reply = state
                .llm
                .chat(&frame.text, Some(&state.config.system_prompt), &history)
                .await;

            state
                .registry
                .append_history(id, ChatEntry::assistant(reply.clone()))
                .await;
            Some(ServerMessage::ai_reply(reply))
        }
    }
}

fn guest_name() -> String {
    petname::petname(2, "-").unwrap_or_else(|| "guest".to_string())
}
