// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Aggregates worker heartbeats, queue depths, and `SyncRun` counters into a
//! point-in-time health snapshot, and emits events when a snapshot crosses a
//! configured threshold.
//!
//! The aggregate-then-derive shape follows the ancestor workspace's
//! `MetricsCollector::summary` (`abp-telemetry`): collect raw samples behind a
//! lock, then compute percentiles and rates from a cloned snapshot rather than
//! holding the lock across the math.

use chrono::{DateTime, Duration, Utc};
use marketsync_core::{SyncRunStatus, SyncType};
use marketsync_queue::QueueStats;
use marketsync_store::PersistencePort;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use uuid::Uuid;

/// Thresholds that turn a [`SupervisionSnapshot`] into [`ThresholdEvent`]s.
///
/// Deliberately not hard-coded: an operator tunes these per deployment.
#[derive(Debug, Clone, Copy)]
pub struct SupervisionThresholds {
    /// A worker with no heartbeat for this long is considered stalled.
    pub stale_heartbeat: Duration,
    /// A queue at or above this depth raises [`ThresholdEvent::QueueDepthExceeded`].
    pub max_queue_depth: usize,
    /// A task whose running `SyncRun`s have a failure ratio at or above this
    /// raises [`ThresholdEvent::ErrorRateExceeded`].
    pub max_error_rate: f64,
}

impl Default for SupervisionThresholds {
    fn default() -> Self {
        Self {
            stale_heartbeat: Duration::seconds(90),
            max_queue_depth: 500,
            max_error_rate: 0.5,
        }
    }
}

/// Registry of the most recent heartbeat timestamp per worker.
///
/// Workers call [`Self::record`] on every `process_next` tick (idle or not);
/// the supervisor reads [`Self::snapshot`] independently.
#[derive(Debug, Default)]
pub struct HeartbeatRegistry {
    last_seen: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl HeartbeatRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `worker_id` is alive as of `now`.
    pub fn record(&self, worker_id: &str, now: DateTime<Utc>) {
        let mut guard = self.last_seen.lock().expect("heartbeat lock poisoned");
        guard.insert(worker_id.to_string(), now);
    }

    /// Every known worker id with its last heartbeat time.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, DateTime<Utc>> {
        self.last_seen.lock().expect("heartbeat lock poisoned").clone()
    }
}

/// Per-queue depth, keyed by the queue's label (see `QueueName::label`).
pub type QueueDepths = BTreeMap<&'static str, usize>;

/// Per-task-name throughput and error-rate over its currently tracked `SyncRun`s.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TaskThroughput {
    /// Number of `SyncRun`s contributing to this entry.
    pub run_count: usize,
    /// Sum of `processed` across those runs.
    pub processed_total: u64,
    /// Weighted failure ratio across those runs' processed records.
    pub error_rate: f64,
}

/// A point-in-time health snapshot.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SupervisionSnapshot {
    /// Worker ids that heartbeat within the staleness window.
    pub active_workers: Vec<String>,
    /// Worker ids that have not heartbeat within the staleness window.
    pub stalled_workers: Vec<String>,
    /// Queue depths by queue label.
    pub queue_depths: QueueDepths,
    /// Throughput and error rate by `task_name`.
    pub throughput_by_task: BTreeMap<String, TaskThroughput>,
}

/// A threshold crossing detected against a [`SupervisionSnapshot`].
#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdEvent {
    /// A worker has not sent a heartbeat within the staleness window.
    WorkerStalled {
        /// The stalled worker's id.
        worker_id: String,
    },
    /// A queue's depth is at or above the configured maximum.
    QueueDepthExceeded {
        /// The queue's label.
        queue: &'static str,
        /// Observed depth.
        depth: usize,
        /// Configured threshold.
        threshold: usize,
    },
    /// A task's aggregate error rate is at or above the configured maximum.
    ErrorRateExceeded {
        /// The task name, e.g. `"sync.products"`.
        task_name: String,
        /// Observed error rate in `[0.0, 1.0]`.
        rate: f64,
        /// Configured threshold.
        threshold: f64,
    },
}

/// Builds [`SupervisionSnapshot`]s from live worker and store state.
pub struct Supervisor {
    store: Arc<dyn PersistencePort>,
    heartbeats: Arc<HeartbeatRegistry>,
    thresholds: SupervisionThresholds,
}

impl Supervisor {
    /// Build a supervisor over `store`, sharing `heartbeats` with the running
    /// worker pool.
    #[must_use]
    pub fn new(store: Arc<dyn PersistencePort>, heartbeats: Arc<HeartbeatRegistry>, thresholds: SupervisionThresholds) -> Self {
        Self { store, heartbeats, thresholds }
    }

    /// Aggregate current worker, queue, and `SyncRun` state into a snapshot.
    ///
    /// `queues` is a [`QueueStats`] snapshot per live `DurableQueue`, taken by
    /// the caller (supervision doesn't hold any queue's lock itself).
    pub async fn snapshot(&self, now: DateTime<Utc>, queues: &[QueueStats]) -> SupervisionSnapshot {
        let mut active_workers = Vec::new();
        let mut stalled_workers = Vec::new();
        for (worker_id, last_seen) in self.heartbeats.snapshot() {
            if now - last_seen <= self.thresholds.stale_heartbeat {
                active_workers.push(worker_id);
            } else {
                stalled_workers.push(worker_id);
            }
        }

        let mut queue_depths = QueueDepths::new();
        for stats in queues {
            for (name, depth) in &stats.by_queue {
                *queue_depths.entry(name).or_insert(0) += depth;
            }
        }

        let runs = self.store.list_sync_runs().await;
        let mut throughput_by_task: BTreeMap<String, TaskThroughput> = BTreeMap::new();
        for run in &runs {
            let entry = throughput_by_task.entry(run.task_name.clone()).or_default();
            entry.run_count += 1;
            entry.processed_total += run.counters.processed;
        }
        for (task_name, entry) in throughput_by_task.iter_mut() {
            let task_runs: Vec<_> = runs.iter().filter(|r| &r.task_name == task_name).collect();
            let processed: u64 = task_runs.iter().map(|r| r.counters.processed).sum();
            let failed: u64 = task_runs.iter().map(|r| r.counters.failed).sum();
            entry.error_rate = if processed == 0 { 0.0 } else { failed as f64 / processed as f64 };
        }

        SupervisionSnapshot {
            active_workers,
            stalled_workers,
            queue_depths,
            throughput_by_task,
        }
    }

    /// Derive threshold-crossing events from a snapshot, logging each at
    /// `warn` as it's raised.
    #[must_use]
    pub fn check_thresholds(&self, snapshot: &SupervisionSnapshot) -> Vec<ThresholdEvent> {
        let mut events = Vec::new();

        for worker_id in &snapshot.stalled_workers {
            tracing::warn!(target: "marketsync.supervise", worker_id, "worker stalled");
            events.push(ThresholdEvent::WorkerStalled { worker_id: worker_id.clone() });
        }

        for (queue, depth) in &snapshot.queue_depths {
            if *depth >= self.thresholds.max_queue_depth {
                tracing::warn!(target: "marketsync.supervise", queue, depth, threshold = self.thresholds.max_queue_depth, "queue depth exceeded");
                events.push(ThresholdEvent::QueueDepthExceeded {
                    queue,
                    depth: *depth,
                    threshold: self.thresholds.max_queue_depth,
                });
            }
        }

        for (task_name, throughput) in &snapshot.throughput_by_task {
            if throughput.error_rate >= self.thresholds.max_error_rate {
                tracing::warn!(target: "marketsync.supervise", task_name, rate = throughput.error_rate, threshold = self.thresholds.max_error_rate, "error rate exceeded");
                events.push(ThresholdEvent::ErrorRateExceeded {
                    task_name: task_name.clone(),
                    rate: throughput.error_rate,
                    threshold: self.thresholds.max_error_rate,
                });
            }
        }

        events
    }
}

/// Aggregate dashboard KPIs across products, suppliers, and runs, as exposed
/// by the administrative surface's `/dashboard/stats`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DashboardStats {
    /// Total non-deleted products.
    pub product_count: usize,
    /// Total non-deleted suppliers.
    pub supplier_count: usize,
    /// `SyncRun`s currently running or pending.
    pub active_runs: usize,
    /// `SyncRun`s that finished in the last 24h, by terminal status.
    pub recent_runs_by_status: BTreeMap<String, usize>,
}

/// Compute [`DashboardStats`] from the store, windowing "recent" to the 24h
/// before `now`.
pub async fn dashboard_stats(store: &dyn PersistencePort, now: DateTime<Utc>) -> DashboardStats {
    let runs = store.list_sync_runs().await;
    let window_start = now - Duration::hours(24);

    let mut stats = DashboardStats::default();
    for run in &runs {
        if !run.status.is_terminal() {
            stats.active_runs += 1;
            continue;
        }
        let finished_recently = run.finished_at.is_some_and(|t| t >= window_start);
        if finished_recently {
            let key = format!("{:?}", run.status).to_lowercase();
            *stats.recent_runs_by_status.entry(key).or_insert(0) += 1;
        }
    }

    let product_filter = marketsync_store::ProductFilter {
        limit: 1,
        ..Default::default()
    };
    stats.product_count = store.list_products(&product_filter).await.total;
    stats.supplier_count = store.count_suppliers().await;

    stats
}

/// `true` if `sync_type` is relevant to a supplier-only run (used by CLI and
/// HTTP surfaces to route a `--category` filter to the right coordinator
/// pipeline).
#[must_use]
pub fn is_supplier_sync(sync_type: SyncType) -> bool {
    matches!(sync_type, SyncType::Supplier | SyncType::All)
}

/// `true` if `run_id` matches a known `SyncRun` that has not yet reached a
/// terminal [`SyncRunStatus`].
pub async fn is_cancellable(store: &dyn PersistencePort, run_id: Uuid) -> bool {
    store.get_sync_run(run_id).await.is_some_and(|r| !r.status.is_terminal())
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketsync_queue::QueueName;
    use marketsync_store::InMemoryStore;

    #[tokio::test]
    async fn stalled_worker_is_flagged() {
        let store: Arc<dyn PersistencePort> = Arc::new(InMemoryStore::new());
        let heartbeats = Arc::new(HeartbeatRegistry::new());
        let now = Utc::now();
        heartbeats.record("worker-1", now - Duration::seconds(200));
        heartbeats.record("worker-2", now);

        let supervisor = Supervisor::new(store, heartbeats, SupervisionThresholds::default());
        let snapshot = supervisor.snapshot(now, &[]).await;
        assert_eq!(snapshot.active_workers, vec!["worker-2".to_string()]);
        assert_eq!(snapshot.stalled_workers, vec!["worker-1".to_string()]);

        let events = supervisor.check_thresholds(&snapshot);
        assert!(events.contains(&ThresholdEvent::WorkerStalled { worker_id: "worker-1".to_string() }));
    }

    #[tokio::test]
    async fn queue_depth_threshold_fires() {
        let store: Arc<dyn PersistencePort> = Arc::new(InMemoryStore::new());
        let heartbeats = Arc::new(HeartbeatRegistry::new());
        let thresholds = SupervisionThresholds {
            max_queue_depth: 2,
            ..SupervisionThresholds::default()
        };
        let supervisor = Supervisor::new(store, heartbeats, thresholds);

        let mut queue = marketsync_queue::DurableQueue::new(10);
        let now = Utc::now();
        for _ in 0..3 {
            queue
                .enqueue(marketsync_queue::QueuedWork {
                    work_id: Uuid::new_v4(),
                    task_name: "sync.products".to_string(),
                    queue_name: QueueName::Crawler,
                    priority: marketsync_queue::Priority::NORMAL,
                    payload: serde_json::json!({}),
                    enqueued_at: now,
                    not_before: now,
                    attempt_no: 0,
                    lease: None,
                })
                .unwrap();
        }

        let snapshot = supervisor.snapshot(now, &[queue.stats(now)]).await;
        let events = supervisor.check_thresholds(&snapshot);
        assert!(events.iter().any(|e| matches!(e, ThresholdEvent::QueueDepthExceeded { depth: 3, .. })));
    }

    #[tokio::test]
    async fn high_error_rate_is_flagged() {
        let store: Arc<dyn PersistencePort> = Arc::new(InMemoryStore::new());
        let mut run = marketsync_core::SyncRun {
            task_id: Uuid::new_v4(),
            task_name: "sync.products".to_string(),
            operation_type: marketsync_core::OperationType::Manual,
            sync_type: SyncType::Product,
            status: SyncRunStatus::Running,
            progress: 50,
            counters: marketsync_core::SyncCounters {
                total: 10,
                processed: 10,
                success: 2,
                failed: 8,
                skipped: 0,
            },
            started_at: Some(Utc::now()),
            finished_at: None,
            error_digest: Default::default(),
            config_snapshot: serde_json::json!({}),
            recommendations: vec![],
            retried_from: None,
        };
        store.create_sync_run(run.clone()).await.unwrap();
        run.progress = 60;
        store.update_sync_run(run).await.unwrap();

        let supervisor = Supervisor::new(store, Arc::new(HeartbeatRegistry::new()), SupervisionThresholds::default());
        let snapshot = supervisor.snapshot(Utc::now(), &[]).await;
        let events = supervisor.check_thresholds(&snapshot);
        assert!(events.iter().any(|e| matches!(e, ThresholdEvent::ErrorRateExceeded { task_name, .. } if task_name == "sync.products")));
    }
}
