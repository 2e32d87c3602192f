// SPDX-License-Identifier: MIT OR Apache-2.0
//! WebSocket push-surface tests for the daemon, run against a real bound
//! port the way the ancestor workspace's `abp-daemon` websocket tests do.

use chrono::Utc;
use futures::StreamExt;
use marketsync_daemon::AppState;
use marketsync_daemon::events::Channel;
use marketsync_queue::DurableQueue;
use marketsync_store::InMemoryStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

fn test_state() -> Arc<AppState> {
    let store: Arc<dyn marketsync_store::PersistencePort> = Arc::new(InMemoryStore::new());
    let queue = Arc::new(Mutex::new(DurableQueue::new(16)));
    Arc::new(AppState::new(store, queue, Utc::now()))
}

async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let app = marketsync_daemon::build_app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn subscriber_sees_events_published_after_connecting() {
    let state = test_state();
    let addr = spawn_server(state.clone()).await;

    let url = format!("ws://127.0.0.1:{}/ws", addr.port());
    let (stream, resp) = tokio_tungstenite::connect_async(&url).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::SWITCHING_PROTOCOLS);
    let (_sink, mut read) = stream.split();

    state.events.publish(Channel::NewProduct, None, serde_json::json!({"id": "p1"})).await;

    let msg = read.next().await.unwrap().unwrap();
    match msg {
        Message::Text(text) => {
            let event: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(event["channel"], "new_product");
        }
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn reconnect_with_since_seq_replays_backlog_before_live_events() {
    let state = test_state();
    let task_id = uuid::Uuid::new_v4();
    state.events.publish(Channel::SyncProgress, Some(task_id), serde_json::json!({"pct": 10})).await;
    state.events.publish(Channel::SyncProgress, Some(task_id), serde_json::json!({"pct": 50})).await;

    let addr = spawn_server(state.clone()).await;
    let url = format!("ws://127.0.0.1:{}/ws?task_id={task_id}&since_seq=1", addr.port());
    let (stream, _resp) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (_sink, mut read) = stream.split();

    let msg = read.next().await.unwrap().unwrap();
    let Message::Text(text) = msg else { panic!("expected text frame") };
    let event: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(event["seq"], 2);
    assert_eq!(event["payload"]["pct"], 50);
}
