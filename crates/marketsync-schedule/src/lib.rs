// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Trigger evaluation for interval, cron, and one-shot schedule entries, plus
//! the named-lease singleton guard that keeps only one scheduler instance
//! emitting fires at a time.
//!
//! The lease guard is the same named-lease-through-the-persistence-port shape
//! `marketsync-store` already exposes for its leader lease test; this crate
//! just wraps it in a small retained-holder-id helper so a scheduler process
//! doesn't have to juggle its own identity string by hand.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use marketsync_store::PersistencePort;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A single trigger rule.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fires every `period`, offset by up to `jitter` (must be `<= period / 4`).
    Interval {
        /// Nominal period between fires.
        period: ChronoDuration,
        /// Maximum jitter applied to each computed fire time.
        jitter: ChronoDuration,
    },
    /// Standard 5-field cron, evaluated in `timezone`.
    Cron {
        /// Cron expression, e.g. `"0 */15 * * * *"` (the `cron` crate's
        /// six-field form, seconds first).
        expression: String,
        /// Timezone the expression is evaluated in.
        timezone: Tz,
    },
    /// Fires exactly once, at `at`.
    Delayed {
        /// The instant to fire at.
        at: DateTime<Utc>,
    },
}

/// Errors raised while building or evaluating a [`Trigger`].
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// A cron expression failed to parse.
    #[error("invalid cron expression {expression:?}: {source}")]
    InvalidCron {
        /// The rejected expression.
        expression: String,
        /// Underlying parser error.
        #[source]
        source: cron::error::Error,
    },
    /// An interval trigger's jitter exceeded `period / 4`.
    #[error("jitter {jitter:?} exceeds the allowed period/4 ({max:?}) for period {period:?}")]
    JitterTooLarge {
        /// The nominal period.
        period: ChronoDuration,
        /// The requested jitter.
        jitter: ChronoDuration,
        /// The maximum allowed jitter.
        max: ChronoDuration,
    },
}

impl Trigger {
    fn validate(&self) -> Result<(), ScheduleError> {
        if let Trigger::Interval { period, jitter } = self {
            let max = *period / 4;
            if *jitter > max {
                return Err(ScheduleError::JitterTooLarge {
                    period: *period,
                    jitter: *jitter,
                    max,
                });
            }
        }
        if let Trigger::Cron { expression, .. } = self {
            Schedule::from_str(expression).map_err(|source| ScheduleError::InvalidCron {
                expression: expression.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// One named schedule entry tracked by a [`Scheduler`].
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    /// Symbolic name, also used as the work item's queue key downstream.
    pub name: String,
    /// The trigger rule.
    pub trigger: Trigger,
}

#[derive(Debug, Clone, Default)]
struct EntryState {
    last_fired: Option<DateTime<Utc>>,
    delayed_fired: bool,
}

/// Evaluates a set of [`ScheduleEntry`] values against the current time,
/// coalescing any cron misses accrued during downtime into a single fire.
pub struct Scheduler {
    entries: Vec<(ScheduleEntry, EntryState)>,
}

impl Scheduler {
    /// Build a scheduler from a set of entries, rejecting any with an
    /// invalid cron expression or out-of-range jitter.
    ///
    /// # Errors
    ///
    /// See [`ScheduleError`].
    pub fn new(entries: Vec<ScheduleEntry>) -> Result<Self, ScheduleError> {
        for entry in &entries {
            entry.trigger.validate()?;
        }
        Ok(Self {
            entries: entries.into_iter().map(|e| (e, EntryState::default())).collect(),
        })
    }

    /// Evaluate every entry against `now`, returning the names that are due
    /// to fire, and advancing each fired entry's internal state so it is not
    /// re-emitted for the same occurrence.
    ///
    /// Jitter for interval triggers is deterministic given `jitter_seed`, so
    /// callers (and tests) can reproduce a tick.
    pub fn tick(&mut self, now: DateTime<Utc>, jitter_seed: u32) -> Vec<String> {
        let mut due = Vec::new();
        for (entry, state) in &mut self.entries {
            if let Some(fire_at) = next_fire(&entry.trigger, state, now, jitter_seed) {
                if fire_at <= now {
                    tracing::debug!(target: "marketsync.schedule", name = %entry.name, %fire_at, "trigger due");
                    due.push(entry.name.clone());
                    state.last_fired = Some(now);
                    if matches!(entry.trigger, Trigger::Delayed { .. }) {
                        state.delayed_fired = true;
                    }
                }
            }
        }
        due
    }
}

fn next_fire(trigger: &Trigger, state: &EntryState, now: DateTime<Utc>, jitter_seed: u32) -> Option<DateTime<Utc>> {
    match trigger {
        Trigger::Interval { period, jitter } => {
            let base = state.last_fired.unwrap_or(now) + *period;
            Some(base + jittered_offset(*jitter, jitter_seed))
        }
        Trigger::Delayed { at } => {
            if state.delayed_fired {
                None
            } else {
                Some(*at)
            }
        }
        Trigger::Cron { expression, timezone } => {
            // Expression already validated at construction time.
            let schedule = Schedule::from_str(expression).ok()?;
            coalesced_cron_fire(&schedule, *timezone, state.last_fired, now)
        }
    }
}

/// Deterministic pseudo-jitter in `[-jitter, +jitter]`, keyed by `seed`.
fn jittered_offset(jitter: ChronoDuration, seed: u32) -> ChronoDuration {
    if jitter.is_zero() {
        return ChronoDuration::zero();
    }
    let span = jitter.num_milliseconds().saturating_mul(2).max(1);
    let offset_ms = (seed as i64).rem_euclid(span) - jitter.num_milliseconds();
    ChronoDuration::milliseconds(offset_ms)
}

/// Find the single fire time to emit for a cron trigger, coalescing any
/// occurrences missed between `last_fired` and `now` into the most recent
/// one so a long downtime never produces a catch-up storm.
fn coalesced_cron_fire(schedule: &Schedule, timezone: Tz, last_fired: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let after = last_fired.unwrap_or(now - ChronoDuration::seconds(1)).with_timezone(&timezone);
    let now_tz = now.with_timezone(&timezone);

    let mut last_due = None;
    for occurrence in schedule.after(&after) {
        if occurrence > now_tz {
            break;
        }
        last_due = Some(occurrence);
    }
    last_due.map(|dt| dt.with_timezone(&Utc))
}

/// Holds (and renews) a named leader lease through a [`PersistencePort`] so
/// that only one scheduler process emits fires at a time.
pub struct LeaderGuard {
    store: Arc<dyn PersistencePort>,
    lease_name: String,
    holder_id: String,
    ttl: Duration,
}

impl LeaderGuard {
    /// Create a guard for `lease_name`, identifying this process as `holder_id`.
    #[must_use]
    pub fn new(store: Arc<dyn PersistencePort>, lease_name: impl Into<String>, holder_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            lease_name: lease_name.into(),
            holder_id: holder_id.into(),
            ttl,
        }
    }

    /// Build a guard with a random holder id, suitable for a process that
    /// doesn't otherwise have a stable identity.
    #[must_use]
    pub fn with_random_holder(store: Arc<dyn PersistencePort>, lease_name: impl Into<String>, ttl: Duration) -> Self {
        Self::new(store, lease_name, Uuid::new_v4().to_string(), ttl)
    }

    /// Attempt to acquire or renew leadership. Call on every scheduler tick;
    /// only act on fires while this returns `true`.
    pub async fn is_leader(&self) -> bool {
        self.store.acquire_leader_lease(&self.lease_name, &self.holder_id, self.ttl).await
    }

    /// Give up leadership early, e.g. on graceful shutdown.
    pub async fn release(&self) {
        self.store.release_leader_lease(&self.lease_name, &self.holder_id).await;
    }
}
