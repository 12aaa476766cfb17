//! WebSocket event channel for the pairing protocol.
//!
//! Each connection is one subscriber: it owns a bounded update channel that
//! is registered with every session it subscribes to, and it is dropped from
//! all of them when the socket closes.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vizora_shared::protocol::{ClientMessage, ServerMessage};
use vizora_shared::types::{normalize_code, DeviceInfo};

use crate::api::AppState;
use crate::pairing::{SubscriberId, UpdateSender};

pub async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, addr, socket))
}

async fn handle_socket(state: AppState, addr: SocketAddr, socket: WebSocket) {
    let subscriber = Uuid::new_v4();
    let (updates_tx, mut updates_rx) = mpsc::channel(state.config.subscriber_buffer);
    let (mut sender, mut receiver) = socket.split();

    info!(peer = %addr, subscriber = %subscriber, "Pairing channel connected");

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match ClientMessage::from_json(&text) {
                            Ok(request) => {
                                handle_client_message(&state, subscriber, &updates_tx, request).await
                            }
                            Err(e) => ServerMessage::Error {
                                message: format!("malformed message: {e}"),
                            },
                        };
                        if send_message(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = ServerMessage::Error {
                            message: "unsupported: binary message".into(),
                        };
                        if send_message(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                }
            }
            Some(session) = updates_rx.recv() => {
                let update = ServerMessage::PairingUpdate { session };
                if send_message(&mut sender, &update).await.is_err() {
                    break;
                }
            }
        }
    }

    let dropped = state.pairing.unsubscribe_all(subscriber).await;
    info!(
        peer = %addr,
        subscriber = %subscriber,
        subscriptions = dropped,
        "Pairing channel closed"
    );
}

/// Apply one protocol request and produce the direct reply. Status changes
/// it causes reach subscribers (this connection included) through their
/// update channels.
pub(crate) async fn handle_client_message(
    state: &AppState,
    subscriber: SubscriberId,
    updates: &UpdateSender,
    request: ClientMessage,
) -> ServerMessage {
    let pairing = &state.pairing;

    match request {
        ClientMessage::CreateSession => match pairing.create_session().await {
            Ok(session) => ServerMessage::SessionCreated { session },
            Err(e) => {
                warn!(error = %e, "Failed to create pairing session");
                ServerMessage::Error {
                    message: e.to_string(),
                }
            }
        },

        ClientMessage::Subscribe { code } => {
            let code = match normalize_code(&code) {
                Ok(code) => code,
                Err(e) => return error_reply(e),
            };
            if pairing.subscribe(&code, subscriber, updates.clone()).await {
                ServerMessage::Status {
                    session: pairing.get_session(&code).await,
                }
            } else {
                ServerMessage::Error {
                    message: format!("unknown pairing code {code}"),
                }
            }
        }

        ClientMessage::Unsubscribe { code } => {
            let code = match normalize_code(&code) {
                Ok(code) => code,
                Err(e) => return error_reply(e),
            };
            pairing.unsubscribe(&code, subscriber).await;
            debug!(code = %code, subscriber = %subscriber, "Unsubscribed");
            ServerMessage::Status {
                session: pairing.get_session(&code).await,
            }
        }

        ClientMessage::CheckStatus { code } => match normalize_code(&code) {
            Ok(code) => ServerMessage::Status {
                session: pairing.get_session(&code).await,
            },
            Err(e) => error_reply(e),
        },

        ClientMessage::RegisterWithCode {
            code,
            device_id,
            name,
            metadata,
        } => {
            let device_info = DeviceInfo {
                device_id,
                name,
                metadata,
            };
            pair(state, &code, device_info).await
        }

        ClientMessage::PairDevice { code, device_info } => pair(state, &code, device_info).await,
    }
}

async fn pair(state: &AppState, code: &str, device_info: DeviceInfo) -> ServerMessage {
    let code = match normalize_code(code) {
        Ok(code) => code,
        Err(e) => return error_reply(e),
    };
    if device_info.device_id.trim().is_empty() {
        return ServerMessage::Error {
            message: "device_id must not be empty".into(),
        };
    }

    ServerMessage::PairResult {
        outcome: state.pairing.pair_device(&code, device_info).await,
    }
}

fn error_reply(err: impl std::fmt::Display) -> ServerMessage {
    ServerMessage::Error {
        message: err.to_string(),
    }
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    match message.to_json() {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(e) => {
            warn!(error = %e, "Failed to encode pairing message");
            Ok(())
        }
    }
}
