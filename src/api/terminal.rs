//! WebSocket-backed browser terminal over the session relay.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::routes::AppState;
use crate::relay::{SessionEvent, SessionMode};

#[derive(Debug, Deserialize)]
#[serde(tag = "t")]
enum ClientMsg {
    #[serde(rename = "start")]
    Start {
        account: String,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        login: bool,
    },
    #[serde(rename = "i")]
    Input { d: String },
    #[serde(rename = "r")]
    Resize { c: u16, r: u16 },
    #[serde(rename = "stop")]
    Stop,
}

pub async fn terminal_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_terminal(socket, state))
}

async fn handle_terminal(socket: WebSocket, state: Arc<AppState>) {
    let session_key = uuid::Uuid::new_v4().to_string();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SessionEvent>();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Pump session events to the socket as JSON.
    let send_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => {
                let Ok(parsed) = serde_json::from_str::<ClientMsg>(&text) else {
                    continue;
                };
                match parsed {
                    ClientMsg::Start {
                        account,
                        cwd,
                        login,
                    } => {
                        let mode = if login {
                            SessionMode::LoginCapture
                        } else {
                            SessionMode::Normal
                        };
                        let result = match state.vault.find_account_id(&account).await {
                            Ok(account_id) => {
                                state
                                    .relay
                                    .clone()
                                    .start(
                                        &session_key,
                                        &account_id,
                                        cwd.as_deref(),
                                        mode,
                                        events_tx.clone(),
                                    )
                                    .await
                                    .map_err(|e| e.to_string())
                            }
                            Err(e) => Err(e.to_string()),
                        };
                        if let Err(message) = result {
                            let _ = events_tx.send(SessionEvent::TerminalError { message });
                        }
                    }
                    ClientMsg::Input { d } => {
                        state.relay.write_input(&session_key, d.as_bytes()).await;
                    }
                    ClientMsg::Resize { c, r } => {
                        state.relay.resize(&session_key, r, c).await;
                    }
                    ClientMsg::Stop => {
                        state.relay.stop(&session_key).await;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Caller disconnect is one of the teardown triggers.
    state.relay.stop(&session_key).await;
    drop(events_tx);
    let _ = send_task.await;
}
