// SPDX-License-Identifier: MIT OR Apache-2.0
//! The worker execution loop: lease a work item, decode its task name,
//! invoke the registered handler, then ack, nack-with-backoff, or escalate.

use crate::context::TaskContext;
use crate::hooks::HookRegistry;
use crate::registry::{TaskError, TaskRegistry};
use crate::retry::{self, RetryOutcome, RetryPolicy};
use chrono::{DateTime, Utc};
use marketsync_queue::{DurableQueue, QueueName};
use marketsync_store::PersistencePort;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// What happened to a single leased work item.
#[derive(Debug, PartialEq)]
pub enum ProcessOutcome {
    /// No item was due in the given queue.
    Idle,
    /// The handler succeeded; the item was acked.
    Acked,
    /// The handler failed transiently; the item was nacked for retry.
    Nacked {
        /// Delay before the item becomes visible again.
        delay: Duration,
    },
    /// The handler failed irrecoverably; the item was acked off the queue
    /// (removed) without being retried.
    Terminal,
    /// The handler failed in a way that needs a human; the item was acked
    /// off the queue and should be surfaced through supervision.
    EscalatedForManualReview,
    /// The registry has no handler for the leased item's task name; treated
    /// like a terminal failure so a typo'd task name can't wedge the queue.
    UnknownTaskName {
        /// The unrecognized task name.
        task_name: String,
    },
}

/// Executes leased work against a [`TaskRegistry`], applying [`RetryPolicy`]
/// on failure and firing [`HookRegistry`] callbacks around each attempt.
pub struct Worker {
    registry: TaskRegistry,
    hooks: HookRegistry,
    store: Arc<dyn PersistencePort>,
    policy: RetryPolicy,
    lease_ttl: Duration,
}

impl Worker {
    /// Build a worker bound to `store`, using `policy` for retry decisions
    /// and leasing work items for `lease_ttl` at a time.
    #[must_use]
    pub fn new(registry: TaskRegistry, hooks: HookRegistry, store: Arc<dyn PersistencePort>, policy: RetryPolicy, lease_ttl: Duration) -> Self {
        Self {
            registry,
            hooks,
            store,
            policy,
            lease_ttl,
        }
    }

    /// Lease and process at most one item from `queue_name`. Returns
    /// [`ProcessOutcome::Idle`] immediately if nothing is due.
    pub async fn process_next(&self, queue: &Mutex<DurableQueue>, queue_name: QueueName, now: DateTime<Utc>) -> ProcessOutcome {
        let leased = {
            let mut q = queue.lock().await;
            q.lease(queue_name, now, chrono::Duration::from_std(self.lease_ttl).unwrap_or_default())
        };
        let Some((work, lease)) = leased else {
            return ProcessOutcome::Idle;
        };

        let Some(handler) = self.registry.get(&work.task_name) else {
            tracing::warn!(target: "marketsync.runtime", task_name = %work.task_name, "no handler registered");
            let mut q = queue.lock().await;
            let _ = q.ack(work.work_id, lease.token);
            return ProcessOutcome::UnknownTaskName { task_name: work.task_name };
        };

        self.hooks.fire_start(&work.task_name);
        let ctx = TaskContext::new(self.store.clone(), work.work_id);
        let result = handler.run(work.payload.clone(), &ctx).await;

        match result {
            Ok(()) => {
                self.hooks.fire_complete(&work.task_name);
                let mut q = queue.lock().await;
                let _ = q.ack(work.work_id, lease.token);
                ProcessOutcome::Acked
            }
            Err(err) => {
                self.hooks.fire_error(&work.task_name, &err);
                self.handle_failure(queue, &work.task_name, work.work_id, lease.token, work.attempt_no, &err, now).await
            }
        }
    }

    async fn handle_failure(
        &self,
        queue: &Mutex<DurableQueue>,
        task_name: &str,
        work_id: uuid::Uuid,
        token: uuid::Uuid,
        attempt_no: u32,
        err: &TaskError,
        now: DateTime<Utc>,
    ) -> ProcessOutcome {
        let TaskError::Classified { code, .. } = err else {
            // Cancellation observed at a safe point: no retry, drop quietly.
            let mut q = queue.lock().await;
            let _ = q.ack(work_id, token);
            return ProcessOutcome::Terminal;
        };

        match retry::classify(*code, attempt_no, &self.policy) {
            RetryOutcome::Retry { delay } => {
                let mut q = queue.lock().await;
                let _ = q.nack(work_id, token, now, chrono::Duration::from_std(delay).unwrap_or_default());
                tracing::warn!(target: "marketsync.runtime.retry", task_name, %code, attempt_no, ?delay, "retrying");
                ProcessOutcome::Nacked { delay }
            }
            RetryOutcome::Terminal => {
                let mut q = queue.lock().await;
                let _ = q.ack(work_id, token);
                tracing::error!(target: "marketsync.runtime.retry", task_name, %code, "terminal failure");
                ProcessOutcome::Terminal
            }
            RetryOutcome::ManualReview => {
                let mut q = queue.lock().await;
                let _ = q.ack(work_id, token);
                tracing::error!(target: "marketsync.runtime.retry", task_name, %code, "escalated for manual review");
                ProcessOutcome::EscalatedForManualReview
            }
        }
    }
}
