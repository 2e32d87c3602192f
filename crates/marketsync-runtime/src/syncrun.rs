// SPDX-License-Identifier: MIT OR Apache-2.0
//! The [`SyncRun`] state machine: `pending -> running -> {completed, failed, cancelled}`.
//!
//! Adapted from the ancestor workspace's `LifecycleManager` (`abp-host::lifecycle`):
//! an explicit allowed-transition-pairs table checked with `matches!`, rather
//! than letting any caller set an arbitrary status.

use marketsync_core::{SyncCounters, SyncRun, SyncRunStatus};
use std::fmt;

/// The failure ratio above which a running sync is forced to `failed` even
/// without an explicit irrecoverable error.
pub const FAILURE_RATIO_THRESHOLD: f64 = 0.5;

/// Errors raised by an invalid [`SyncRun`] state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The transition is not allowed by the state machine.
    Invalid {
        /// The state transitioned from.
        from: SyncRunStatus,
        /// The state that was requested.
        to: SyncRunStatus,
    },
    /// The run is already in the requested state.
    AlreadyInState(SyncRunStatus),
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { from, to } => write!(f, "invalid sync run transition from {from:?} to {to:?}"),
            Self::AlreadyInState(s) => write!(f, "sync run already in state {s:?}"),
        }
    }
}

impl std::error::Error for TransitionError {}

fn can_transition(from: SyncRunStatus, to: SyncRunStatus) -> bool {
    matches!(
        (from, to),
        (SyncRunStatus::Pending, SyncRunStatus::Running)
            | (SyncRunStatus::Running, SyncRunStatus::Completed)
            | (SyncRunStatus::Running, SyncRunStatus::Failed)
            | (SyncRunStatus::Running, SyncRunStatus::Cancelled)
    )
}

/// Attempt to move `run` into state `to`, using `run.counters` to sanity-check
/// `Completed`/`Failed` transitions. Reverse transitions are always rejected.
///
/// # Errors
///
/// [`TransitionError::Invalid`] if the transition pair is not in the allowed
/// table, [`TransitionError::AlreadyInState`] if `run.status == to`.
pub fn transition(run: &mut SyncRun, to: SyncRunStatus, now: chrono::DateTime<chrono::Utc>) -> Result<(), TransitionError> {
    if run.status == to {
        return Err(TransitionError::AlreadyInState(to));
    }
    if !can_transition(run.status, to) {
        return Err(TransitionError::Invalid { from: run.status, to });
    }
    run.status = to;
    match to {
        SyncRunStatus::Running if run.started_at.is_none() => run.started_at = Some(now),
        SyncRunStatus::Completed | SyncRunStatus::Failed | SyncRunStatus::Cancelled => run.finished_at = Some(now),
        _ => {}
    }
    Ok(())
}

/// Decide the natural terminal state implied by `counters`, or `None` if the
/// run should keep running.
///
/// A run completes once every expected record has been processed with a
/// failure ratio at or below [`FAILURE_RATIO_THRESHOLD`]; it fails once the
/// ratio exceeds the threshold, even mid-stream, so a worker can bail out of
/// a clearly doomed run instead of grinding through every remaining page.
#[must_use]
pub fn natural_terminal_state(counters: &SyncCounters) -> Option<SyncRunStatus> {
    if counters.failure_ratio() > FAILURE_RATIO_THRESHOLD {
        return Some(SyncRunStatus::Failed);
    }
    if counters.total > 0 && counters.processed >= counters.total {
        return Some(SyncRunStatus::Completed);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketsync_core::{ErrorDigest, OperationType, SyncType};
    use uuid::Uuid;

    fn fresh_run() -> SyncRun {
        SyncRun {
            task_id: Uuid::new_v4(),
            task_name: "sync.products".to_string(),
            operation_type: OperationType::Scheduled,
            sync_type: SyncType::Product,
            status: SyncRunStatus::Pending,
            progress: 0,
            counters: SyncCounters::default(),
            started_at: None,
            finished_at: None,
            error_digest: ErrorDigest::new(),
            config_snapshot: serde_json::json!({}),
            recommendations: vec![],
            retried_from: None,
        }
    }

    #[test]
    fn pending_to_running_to_completed_is_allowed() {
        let mut run = fresh_run();
        transition(&mut run, SyncRunStatus::Running, Utc::now()).unwrap();
        assert!(run.started_at.is_some());
        transition(&mut run, SyncRunStatus::Completed, Utc::now()).unwrap();
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn reverse_transition_is_rejected() {
        let mut run = fresh_run();
        transition(&mut run, SyncRunStatus::Running, Utc::now()).unwrap();
        transition(&mut run, SyncRunStatus::Completed, Utc::now()).unwrap();
        let err = transition(&mut run, SyncRunStatus::Running, Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::Invalid { .. }));
    }

    #[test]
    fn skipping_running_is_rejected() {
        let mut run = fresh_run();
        let err = transition(&mut run, SyncRunStatus::Completed, Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::Invalid { .. }));
    }

    #[test]
    fn high_failure_ratio_forces_failed() {
        let counters = SyncCounters { total: 100, processed: 20, success: 5, failed: 15, skipped: 0 };
        assert_eq!(natural_terminal_state(&counters), Some(SyncRunStatus::Failed));
    }

    #[test]
    fn full_success_forces_completed() {
        let counters = SyncCounters { total: 10, processed: 10, success: 10, failed: 0, skipped: 0 };
        assert_eq!(natural_terminal_state(&counters), Some(SyncRunStatus::Completed));
    }
}
