// SPDX-License-Identifier: MIT OR Apache-2.0
//! The real-time push surface: a bounded mailbox per connection, fed from a
//! shared event log so a reconnecting client can replay what it missed.
//!
//! State shape follows the ancestor workspace's `AppState` (`abp-daemon`): an
//! `Arc<RwLock<_>>` held by the router, cloned into each handler. Here the
//! guarded value is a ring of recent [`PushEvent`]s per task instead of a
//! receipt map, and each subscriber gets its own `tokio::sync::mpsc` sender
//! rather than polling storage.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Subscription channel a push client can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// A `SyncRun`'s progress percentage changed.
    SyncProgress,
    /// A `SyncRun` reached `Completed`.
    SyncCompleted,
    /// A `SyncRun` reached `Failed`.
    SyncFailed,
    /// A new product was persisted for the first time.
    NewProduct,
    /// An existing product was re-synced with changed content.
    ProductUpdated,
    /// A supervision threshold was crossed.
    SystemStatus,
}

/// One pushed message. `seq` is monotonic per `task_id` so a reconnecting
/// client can ask to replay everything after the last sequence it saw.
#[derive(Debug, Clone, Serialize)]
pub struct PushEvent {
    /// Channel this event belongs to.
    pub channel: Channel,
    /// The task (or product) this event concerns, when applicable.
    pub task_id: Option<Uuid>,
    /// Monotonic sequence number, scoped to `task_id` (or global if `None`).
    pub seq: u64,
    /// When the event was recorded.
    pub at: DateTime<Utc>,
    /// Channel-specific payload.
    pub payload: serde_json::Value,
}

/// How many events are retained per task for replay. Older events are
/// dropped; a client that falls further behind than this must resync via the
/// REST surface instead of replay.
const REPLAY_BUFFER_LEN: usize = 256;

/// Bounded mailbox capacity per connection. A subscriber whose mailbox fills
/// (too slow a consumer) is disconnected rather than buffered indefinitely,
/// per the backpressure policy for this surface.
const MAILBOX_CAPACITY: usize = 128;

#[derive(Default)]
struct BusState {
    next_seq: BTreeMap<Option<Uuid>, u64>,
    replay: BTreeMap<Option<Uuid>, VecDeque<PushEvent>>,
    subscribers: Vec<mpsc::Sender<PushEvent>>,
}

/// Shared hub every HTTP handler and WebSocket connection publishes to /
/// subscribes from.
#[derive(Clone, Default)]
pub struct EventBus {
    state: Arc<RwLock<BusState>>,
}

impl EventBus {
    /// Construct an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event, assigning it the next sequence number for its
    /// `task_id` scope, recording it for replay, and fanning it out to every
    /// live subscriber. A subscriber whose mailbox is full is dropped instead
    /// of blocking the publisher.
    pub async fn publish(&self, channel: Channel, task_id: Option<Uuid>, payload: serde_json::Value) -> u64 {
        let mut state = self.state.write().await;
        let seq = {
            let counter = state.next_seq.entry(task_id).or_insert(0);
            *counter += 1;
            *counter
        };
        let event = PushEvent {
            channel,
            task_id,
            seq,
            at: Utc::now(),
            payload,
        };

        let buffer = state.replay.entry(task_id).or_default();
        buffer.push_back(event.clone());
        if buffer.len() > REPLAY_BUFFER_LEN {
            buffer.pop_front();
        }

        state.subscribers.retain(|tx| {
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(target: "marketsync.daemon.push", "slow consumer disconnected, mailbox full");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        seq
    }

    /// Subscribe a new connection. Returns the receiving half of a bounded
    /// mailbox plus, if `replay_task` and `since_seq` are given, every
    /// buffered event for that task with a sequence greater than `since_seq`.
    pub async fn subscribe(&self, replay_task: Option<Uuid>, since_seq: Option<u64>) -> (mpsc::Receiver<PushEvent>, Vec<PushEvent>) {
        let mut state = self.state.write().await;
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        state.subscribers.push(tx);

        let backlog = match (replay_task, since_seq) {
            (Some(task_id), Some(since)) => state
                .replay
                .get(&Some(task_id))
                .map(|buf| buf.iter().filter(|e| e.seq > since).cloned().collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        (rx, backlog)
    }

    /// Current number of live subscribers, for supervision/health reporting.
    pub async fn subscriber_count(&self) -> usize {
        self.state.read().await.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let (mut rx, backlog) = bus.subscribe(None, None).await;
        assert!(backlog.is_empty());

        bus.publish(Channel::NewProduct, None, serde_json::json!({"id": "p1"})).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel, Channel::NewProduct);
        assert_eq!(event.seq, 1);
    }

    #[tokio::test]
    async fn reconnect_replays_events_after_since_seq() {
        let bus = EventBus::new();
        let task_id = Uuid::new_v4();
        for i in 0..3 {
            bus.publish(Channel::SyncProgress, Some(task_id), serde_json::json!({"i": i})).await;
        }

        let (_rx, backlog) = bus.subscribe(Some(task_id), Some(1)).await;
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].seq, 2);
    }

    #[tokio::test]
    async fn slow_consumer_is_dropped_without_blocking_publisher() {
        let bus = EventBus::new();
        let (rx, _backlog) = bus.subscribe(None, None).await;
        for i in 0..(MAILBOX_CAPACITY as u64 + 10) {
            bus.publish(Channel::SystemStatus, None, serde_json::json!({"i": i})).await;
        }
        assert_eq!(bus.subscriber_count().await, 0);
        drop(rx);
    }
}
