// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-task execution context: progress reporting, checkpointing,
//! cancellation, and lease heartbeats.

use chrono::Utc;
use marketsync_core::{Checkpoint, SyncCounters};
use marketsync_store::{PersistencePort, StoreError};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Minimum interval between accepted `report_progress` calls.
pub const PROGRESS_COALESCE_INTERVAL_MS: i64 = 1000;

/// Handed to a [`crate::registry::TaskHandler`] for the duration of one run.
///
/// Mirrors the ancestor workspace's per-run facilities (progress events,
/// checkpoint persistence, cancellation polling) but collapses them into one
/// struct instead of a channel, since a task here runs to completion inline
/// rather than streaming `AgentEvent`s to a separate consumer.
pub struct TaskContext {
    store: Arc<dyn PersistencePort>,
    task_id: Uuid,
    last_progress_report_ms: AtomicI64,
    sequence_no: Mutex<u64>,
}

impl TaskContext {
    /// Build a context bound to `task_id`, backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn PersistencePort>, task_id: Uuid) -> Self {
        Self {
            store,
            task_id,
            last_progress_report_ms: AtomicI64::new(i64::MIN),
            sequence_no: Mutex::new(0),
        }
    }

    /// Report progress, best-effort. Coalesced to at most once per
    /// [`PROGRESS_COALESCE_INTERVAL_MS`]; returns `false` if this call was
    /// dropped by the coalescing window rather than delivered.
    pub fn report_progress(&self, percent: u8, message: &str) -> bool {
        let percent = percent.min(100);
        let now_ms = Utc::now().timestamp_millis();
        let last = self.last_progress_report_ms.load(Ordering::Relaxed);
        if now_ms - last < PROGRESS_COALESCE_INTERVAL_MS {
            return false;
        }
        self.last_progress_report_ms.store(now_ms, Ordering::Relaxed);
        tracing::info!(target: "marketsync.runtime", task_id = %self.task_id, percent, message, "progress");
        true
    }

    /// Durably persist a checkpoint. Returns only after the write completes.
    ///
    /// # Errors
    ///
    /// Propagates any [`StoreError`] from the underlying write.
    pub async fn save_checkpoint(&self, cursor: Vec<u8>, counters: SyncCounters) -> Result<(), StoreError> {
        let mut seq = self.sequence_no.lock().await;
        *seq += 1;
        let checksum = marketsync_core::canonical_checksum(&(&cursor, &counters)).unwrap_or_default();
        let checkpoint = Checkpoint {
            task_id: self.task_id,
            sequence_no: *seq,
            timestamp: Utc::now(),
            cursor,
            counters,
            checksum,
        };
        self.store.write_checkpoint(checkpoint).await
    }

    /// Load the most recent durable checkpoint for this task, if any.
    ///
    /// A corrupt checkpoint is treated as absent (the caller restarts from
    /// the beginning), but is logged as a warning first.
    pub async fn load_checkpoint(&self) -> Option<(Vec<u8>, SyncCounters)> {
        match self.store.read_checkpoint(self.task_id).await {
            Ok(Some(cp)) => {
                *self.sequence_no.lock().await = cp.sequence_no;
                Some((cp.cursor, cp.counters))
            }
            Ok(None) => None,
            Err(StoreError::CheckpointCorrupt(task_id)) => {
                tracing::warn!(target: "marketsync.runtime", %task_id, "checkpoint corrupt, restarting from the beginning");
                None
            }
            Err(err) => {
                tracing::warn!(target: "marketsync.runtime", %err, "checkpoint read failed, restarting from the beginning");
                None
            }
        }
    }

    /// Whether an out-of-band cancellation has been requested for this task.
    /// Handlers must check this at safe points (page boundaries, batch
    /// boundaries) and stop promptly if `true`.
    pub async fn cancel_requested(&self) -> bool {
        self.store.cancel_requested(self.task_id).await
    }

    /// The task id this context is bound to.
    #[must_use]
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }
}
