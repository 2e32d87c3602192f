// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! A bounded, priority-aware work queue with named partitions and
//! lease/ack/nack at-least-once delivery.
//!
//! Adapted from the ancestor workspace's `RunQueue` (`abp-queue`): a plain
//! `Vec<QueuedWork>` scanned for the highest-priority match, FIFO within a
//! priority tier. New here: named-queue partitioning, a `not_before`
//! scheduling field, and lease/ack/nack/extend in place of a bare `dequeue`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Numeric priority scheme. Higher values are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(pub i32);

impl Priority {
    /// Background/batch work.
    pub const LOW: Priority = Priority(0);
    /// Default priority for ordinary sync work.
    pub const NORMAL: Priority = Priority(5);
    /// Operator-triggered or time-sensitive work.
    pub const HIGH: Priority = Priority(8);
    /// Must run before anything else in its queue.
    pub const URGENT: Priority = Priority(10);
}

/// Named partitions a [`QueuedWork`] item can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueName {
    /// Catch-all for work with no more specific partition.
    Default,
    /// Page-crawl work.
    Crawler,
    /// Image-download work.
    Image,
    /// Full data-sync pipeline runs.
    DataSync,
    /// Low-priority bulk/maintenance work.
    Batch,
}

impl QueueName {
    /// Stable lowercase label, used in metrics and logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Crawler => "crawler",
            Self::Image => "image",
            Self::DataSync => "data_sync",
            Self::Batch => "batch",
        }
    }
}

/// An active lease on a [`QueuedWork`] item held by one worker.
#[derive(Debug, Clone)]
pub struct Lease {
    /// Opaque token the holder must present to ack/nack/extend.
    pub token: Uuid,
    /// When the lease expires if not extended or released.
    pub deadline: DateTime<Utc>,
}

/// One item of durable work.
#[derive(Debug, Clone)]
pub struct QueuedWork {
    /// Unique identifier.
    pub work_id: Uuid,
    /// Symbolic task handler name, e.g. `"sync.products"`.
    pub task_name: String,
    /// Partition this item belongs to.
    pub queue_name: QueueName,
    /// Scheduling priority.
    pub priority: Priority,
    /// Opaque handler-specific arguments.
    pub payload: serde_json::Value,
    /// When this item was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time this item may be leased.
    pub not_before: DateTime<Utc>,
    /// Number of times this item has been leased (0 before the first lease).
    pub attempt_no: u32,
    /// The current lease, if any.
    pub lease: Option<Lease>,
}

/// Errors returned by [`DurableQueue`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue has reached its maximum capacity.
    #[error("queue is full (max {max})")]
    Full {
        /// Maximum items the queue can hold.
        max: usize,
    },
    /// An item with this id is already enqueued.
    #[error("duplicate work id: {0}")]
    DuplicateId(Uuid),
    /// No item with this id exists.
    #[error("unknown work id: {0}")]
    NotFound(Uuid),
    /// The item is not currently leased (ack/nack/extend requires a lease).
    #[error("work item {0} is not leased")]
    NotLeased(Uuid),
    /// The presented token does not match the current lease, or the lease
    /// already expired and was superseded.
    #[error("stale or mismatched lease token for {0}")]
    StaleLeaseToken(Uuid),
}

/// Snapshot statistics for a [`DurableQueue`].
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Items currently queued (including leased, unacked items).
    pub total: usize,
    /// Maximum capacity.
    pub max: usize,
    /// Breakdown by queue name.
    pub by_queue: BTreeMap<&'static str, usize>,
    /// Number of items currently under an unexpired lease.
    pub leased: usize,
}

/// A bounded, priority-aware, named-partition work queue.
pub struct DurableQueue {
    entries: Vec<QueuedWork>,
    max_size: usize,
}

impl DurableQueue {
    /// Create an empty queue with the given maximum capacity.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_size,
        }
    }

    /// Enqueue an item for immediate or delayed processing.
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] if at capacity, [`QueueError::DuplicateId`] if
    /// `work.work_id` is already present.
    pub fn enqueue(&mut self, work: QueuedWork) -> Result<(), QueueError> {
        if self.entries.len() >= self.max_size {
            return Err(QueueError::Full { max: self.max_size });
        }
        if self.entries.iter().any(|w| w.work_id == work.work_id) {
            return Err(QueueError::DuplicateId(work.work_id));
        }
        self.entries.push(work);
        Ok(())
    }

    /// Lease the highest-priority, due, unleased item in `queue_name`.
    ///
    /// Ties break FIFO by `enqueued_at`. An item whose previous lease expired
    /// (deadline passed) is eligible again, carrying whatever `attempt_no`
    /// its last [`nack`](Self::nack) left it at.
    pub fn lease(&mut self, queue_name: QueueName, now: DateTime<Utc>, ttl: ChronoDuration) -> Option<(QueuedWork, Lease)> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, w)| w.queue_name == queue_name && w.not_before <= now)
            .filter(|(_, w)| w.lease.as_ref().is_none_or(|l| l.deadline <= now))
            .max_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then_with(|| b.enqueued_at.cmp(&a.enqueued_at)))
            .map(|(i, _)| i)?;

        let lease = Lease {
            token: Uuid::new_v4(),
            deadline: now + ttl,
        };
        let item = &mut self.entries[idx];
        item.lease = Some(lease.clone());
        Some((item.clone(), lease))
    }

    /// Acknowledge successful processing, removing the item.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`], [`QueueError::NotLeased`], or
    /// [`QueueError::StaleLeaseToken`].
    pub fn ack(&mut self, work_id: Uuid, token: Uuid) -> Result<(), QueueError> {
        let idx = self.find_leased(work_id, token)?;
        self.entries.remove(idx);
        Ok(())
    }

    /// Negatively acknowledge: release the lease, bump `attempt_no`, and
    /// reschedule after `delay`.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`], [`QueueError::NotLeased`], or
    /// [`QueueError::StaleLeaseToken`].
    pub fn nack(&mut self, work_id: Uuid, token: Uuid, now: DateTime<Utc>, delay: ChronoDuration) -> Result<(), QueueError> {
        let idx = self.find_leased(work_id, token)?;
        let item = &mut self.entries[idx];
        item.lease = None;
        item.attempt_no += 1;
        item.not_before = now + delay;
        Ok(())
    }

    /// Extend an active lease's deadline.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`], [`QueueError::NotLeased`], or
    /// [`QueueError::StaleLeaseToken`].
    pub fn extend(&mut self, work_id: Uuid, token: Uuid, now: DateTime<Utc>, ttl: ChronoDuration) -> Result<(), QueueError> {
        let idx = self.find_leased(work_id, token)?;
        self.entries[idx].lease = Some(Lease {
            token,
            deadline: now + ttl,
        });
        Ok(())
    }

    fn find_leased(&self, work_id: Uuid, token: Uuid) -> Result<usize, QueueError> {
        let idx = self.entries.iter().position(|w| w.work_id == work_id).ok_or(QueueError::NotFound(work_id))?;
        match &self.entries[idx].lease {
            None => Err(QueueError::NotLeased(work_id)),
            Some(lease) if lease.token != token => Err(QueueError::StaleLeaseToken(work_id)),
            Some(_) => Ok(idx),
        }
    }

    /// Number of items currently queued (leased or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the queue holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot statistics.
    #[must_use]
    pub fn stats(&self, now: DateTime<Utc>) -> QueueStats {
        let mut by_queue = BTreeMap::new();
        let mut leased = 0;
        for entry in &self.entries {
            *by_queue.entry(entry.queue_name.label()).or_insert(0usize) += 1;
            if entry.lease.as_ref().is_some_and(|l| l.deadline > now) {
                leased += 1;
            }
        }
        QueueStats {
            total: self.entries.len(),
            max: self.max_size,
            by_queue,
            leased,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: Uuid, priority: Priority, enqueued_at: DateTime<Utc>) -> QueuedWork {
        QueuedWork {
            work_id: id,
            task_name: "sync.products".to_string(),
            queue_name: QueueName::Crawler,
            priority,
            payload: serde_json::json!({}),
            enqueued_at,
            not_before: enqueued_at,
            attempt_no: 0,
            lease: None,
        }
    }

    #[test]
    fn higher_priority_leased_first() {
        let mut q = DurableQueue::new(10);
        let now = Utc::now();
        let low = Uuid::new_v4();
        let high = Uuid::new_v4();
        q.enqueue(item(low, Priority::LOW, now)).unwrap();
        q.enqueue(item(high, Priority::URGENT, now)).unwrap();
        let (leased, _) = q.lease(QueueName::Crawler, now, ChronoDuration::seconds(30)).unwrap();
        assert_eq!(leased.work_id, high);
    }

    #[test]
    fn fifo_within_same_priority() {
        let mut q = DurableQueue::new(10);
        let now = Utc::now();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        q.enqueue(item(first, Priority::NORMAL, now)).unwrap();
        q.enqueue(item(second, Priority::NORMAL, now + ChronoDuration::seconds(1))).unwrap();
        let (leased, _) = q.lease(QueueName::Crawler, now + ChronoDuration::seconds(5), ChronoDuration::seconds(30)).unwrap();
        assert_eq!(leased.work_id, first);
    }

    #[test]
    fn expired_lease_is_reclaimed() {
        let mut q = DurableQueue::new(10);
        let now = Utc::now();
        let id = Uuid::new_v4();
        q.enqueue(item(id, Priority::NORMAL, now)).unwrap();
        let (_, lease1) = q.lease(QueueName::Crawler, now, ChronoDuration::seconds(1)).unwrap();
        let later = now + ChronoDuration::seconds(5);
        let (reclaimed, lease2) = q.lease(QueueName::Crawler, later, ChronoDuration::seconds(30)).unwrap();
        assert_eq!(reclaimed.work_id, id);
        assert_eq!(reclaimed.attempt_no, 0, "a lease expiring on its own is not a nack and does not bump attempt_no");
        assert_ne!(lease1.token, lease2.token);
    }

    #[test]
    fn stale_token_rejected_on_ack() {
        let mut q = DurableQueue::new(10);
        let now = Utc::now();
        let id = Uuid::new_v4();
        q.enqueue(item(id, Priority::NORMAL, now)).unwrap();
        q.lease(QueueName::Crawler, now, ChronoDuration::seconds(30)).unwrap();
        let err = q.ack(id, Uuid::new_v4()).unwrap_err();
        assert_eq!(err, QueueError::StaleLeaseToken(id));
    }

    #[test]
    fn nack_reschedules_with_delay() {
        let mut q = DurableQueue::new(10);
        let now = Utc::now();
        let id = Uuid::new_v4();
        q.enqueue(item(id, Priority::NORMAL, now)).unwrap();
        let (_, lease) = q.lease(QueueName::Crawler, now, ChronoDuration::seconds(30)).unwrap();
        q.nack(id, lease.token, now, ChronoDuration::seconds(60)).unwrap();
        assert!(q.lease(QueueName::Crawler, now + ChronoDuration::seconds(10), ChronoDuration::seconds(30)).is_none());
        let (redone, _) = q.lease(QueueName::Crawler, now + ChronoDuration::seconds(61), ChronoDuration::seconds(30)).unwrap();
        assert_eq!(redone.work_id, id);
    }

    #[test]
    fn nack_increments_attempt_no_lease_does_not() {
        let mut q = DurableQueue::new(10);
        let now = Utc::now();
        let id = Uuid::new_v4();
        q.enqueue(item(id, Priority::NORMAL, now)).unwrap();

        let (first, lease) = q.lease(QueueName::Crawler, now, ChronoDuration::seconds(30)).unwrap();
        assert_eq!(first.attempt_no, 0);

        q.nack(id, lease.token, now, ChronoDuration::seconds(1)).unwrap();
        let (second, lease) = q.lease(QueueName::Crawler, now + ChronoDuration::seconds(2), ChronoDuration::seconds(30)).unwrap();
        assert_eq!(second.attempt_no, 1);

        q.nack(id, lease.token, now, ChronoDuration::seconds(1)).unwrap();
        let (third, _) = q.lease(QueueName::Crawler, now + ChronoDuration::seconds(4), ChronoDuration::seconds(30)).unwrap();
        assert_eq!(third.attempt_no, 2);
    }

    #[test]
    fn not_before_delays_visibility() {
        let mut q = DurableQueue::new(10);
        let now = Utc::now();
        let id = Uuid::new_v4();
        let mut future_item = item(id, Priority::NORMAL, now);
        future_item.not_before = now + ChronoDuration::seconds(100);
        q.enqueue(future_item).unwrap();
        assert!(q.lease(QueueName::Crawler, now, ChronoDuration::seconds(30)).is_none());
    }

    #[test]
    fn queue_full_rejects_enqueue() {
        let mut q = DurableQueue::new(1);
        let now = Utc::now();
        q.enqueue(item(Uuid::new_v4(), Priority::NORMAL, now)).unwrap();
        let err = q.enqueue(item(Uuid::new_v4(), Priority::NORMAL, now)).unwrap_err();
        assert!(matches!(err, QueueError::Full { max: 1 }));
    }
}
