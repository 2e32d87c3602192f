// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `/ws` upgrade handler: wires one [`EventBus`](crate::events::EventBus)
//! subscription to one WebSocket connection, replaying backlog first.

use crate::AppState;
use crate::events::PushEvent;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Query parameters accepted on the `/ws` upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct WsSubscribeQuery {
    /// Task to replay buffered events for on connect.
    pub task_id: Option<Uuid>,
    /// Replay every event for `task_id` with a sequence greater than this.
    pub since_seq: Option<u64>,
}

pub async fn upgrade(ws: WebSocketUpgrade, Query(query): Query<WsSubscribeQuery>, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, query: WsSubscribeQuery) {
    let (mut rx, backlog) = state.events.subscribe(query.task_id, query.since_seq).await;

    for event in backlog {
        if send_event(&mut socket, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &PushEvent) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(text.into())).await
}
