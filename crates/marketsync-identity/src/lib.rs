// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! A pool of crawl identities (user-agent + proxy pairing) with a per-`(identity, host)`
//! token bucket, handed out to callers in strict FIFO order.
//!
//! Grounded on the ancestor workspace's `SidecarPool`: a single mutex guarding a
//! `BTreeMap` of entries with an explicit state enum, plus `acquire`/`release`. The
//! rate-limiting dimension and FIFO waiter queue are new.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

/// Errors raised while acquiring an identity.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdentityError {
    /// The pool holds no identities at all (or all are banned).
    #[error("no identity available in the pool")]
    NoIdentityAvailable,
}

/// Lifecycle state of a pooled [`Identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    /// Available for a new lease.
    Idle,
    /// Currently leased to a caller.
    Busy,
    /// Permanently excluded (e.g. the origin banned its IP).
    Banned,
}

/// A crawl identity: the user-agent and outbound proxy a request is sent through.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Stable identifier.
    pub id: String,
    /// `User-Agent` header value to present.
    pub user_agent: String,
    /// Outbound proxy URL, if any.
    pub proxy: Option<String>,
}

/// What happened to a request made with a leased identity, reported back on
/// [`release`](IdentityLease::release) so the pool can penalize the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The request completed without the origin pushing back.
    Success,
    /// The origin blocked the request outright.
    Blocked,
    /// The origin served a captcha or other anti-bot challenge.
    Captcha,
    /// The origin rate-limited the request (HTTP 429).
    TooManyRequests,
    /// The origin returned a server error (HTTP 5xx).
    ServerError,
}

impl AcquireOutcome {
    fn is_penalty(self) -> bool {
        !matches!(self, Self::Success)
    }
}

/// Exponential, bounded cooldown applied to an identity after a penalized
/// [`AcquireOutcome`].
#[derive(Debug, Clone, Copy)]
pub struct CooldownConfig {
    /// Cooldown applied after the first penalty.
    pub base: Duration,
    /// Multiplier applied per consecutive penalty.
    pub factor: f64,
    /// Cap on any single cooldown.
    pub max: Duration,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            factor: 2.0,
            max: Duration::from_secs(30 * 60),
        }
    }
}

impl CooldownConfig {
    fn duration_for(&self, consecutive_penalties: u32) -> Duration {
        let exp = self.factor.powi(consecutive_penalties.saturating_sub(1) as i32);
        let ms = (self.base.as_millis() as f64 * exp).min(self.max.as_millis() as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Token-bucket rate limit configuration applied per `(identity, host)` pair.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum burst size.
    pub capacity: f64,
    /// Tokens replenished per second.
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 1.0,
            refill_per_sec: 1.0 / 0.25,
        }
    }
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    config: RateLimitConfig,
}

impl TokenBucket {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            tokens: config.capacity,
            last_refill: Instant::now(),
            config,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.config.refill_per_sec).min(self.config.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&self, now: Instant) -> Duration {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let projected = (self.tokens + elapsed * self.config.refill_per_sec).min(self.config.capacity);
        if projected >= 1.0 {
            return Duration::ZERO;
        }
        let deficit = 1.0 - projected;
        Duration::from_secs_f64((deficit / self.config.refill_per_sec).max(0.0))
    }
}

struct PoolEntry {
    identity: Identity,
    state: IdentityState,
    cooldown_until: Option<Instant>,
    consecutive_penalties: u32,
}

struct PoolState {
    identities: BTreeMap<String, PoolEntry>,
    buckets: HashMap<(String, String), TokenBucket>,
    ticket_queue: VecDeque<u64>,
    next_ticket: u64,
}

/// A pool of identities rate-limited per destination host.
///
/// Callers [`acquire`](Self::acquire) an identity for a host; the call resolves in the
/// order requests were issued (FIFO), once an idle identity with spare rate-limit
/// budget for that host exists, not currently banned, and not cooling down.
pub struct IdentityPool {
    state: Mutex<PoolState>,
    notify: Notify,
    rate_limit: RateLimitConfig,
    cooldown: CooldownConfig,
}

/// A leased identity. Dropping it (or calling [`release`](Self::release) explicitly)
/// returns the identity to the pool.
pub struct IdentityLease<'a> {
    pool: &'a IdentityPool,
    identity: Identity,
    released: bool,
}

impl IdentityLease<'_> {
    /// The leased identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Return the identity to the pool, reporting `outcome` so the pool can
    /// apply a cooldown for a penalized outcome.
    pub async fn release(mut self, outcome: AcquireOutcome) {
        self.pool.release(&self.identity.id, outcome).await;
        self.released = true;
    }
}

impl Drop for IdentityLease<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // The caller dropped the lease without reporting an outcome (e.g. an
        // early return on an unrelated error); assume success rather than
        // cooling down an identity for no observed reason.
        let pool = self.pool;
        let id = self.identity.id.clone();
        tokio::spawn(async move {
            pool.release(&id, AcquireOutcome::Success).await;
        });
    }
}

impl IdentityPool {
    /// Construct an empty pool with a shared rate-limit configuration and
    /// the default [`CooldownConfig`].
    #[must_use]
    pub fn new(rate_limit: RateLimitConfig) -> Self {
        Self::with_cooldown(rate_limit, CooldownConfig::default())
    }

    /// Construct an empty pool with a shared rate-limit and cooldown configuration.
    #[must_use]
    pub fn with_cooldown(rate_limit: RateLimitConfig, cooldown: CooldownConfig) -> Self {
        Self {
            state: Mutex::new(PoolState {
                identities: BTreeMap::new(),
                buckets: HashMap::new(),
                ticket_queue: VecDeque::new(),
                next_ticket: 0,
            }),
            notify: Notify::new(),
            rate_limit,
            cooldown,
        }
    }

    /// Add an identity to the pool in the `Idle` state.
    pub async fn add(&self, identity: Identity) {
        let mut state = self.state.lock().await;
        state.identities.insert(
            identity.id.clone(),
            PoolEntry {
                identity,
                state: IdentityState::Idle,
                cooldown_until: None,
                consecutive_penalties: 0,
            },
        );
        drop(state);
        self.notify.notify_waiters();
    }

    /// Permanently ban an identity (e.g. after a captcha or IP ban response).
    pub async fn ban(&self, id: &str) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.identities.get_mut(id) {
            entry.state = IdentityState::Banned;
        }
    }

    /// Acquire an identity for `host`, waiting in FIFO order until one is idle and
    /// has rate-limit budget remaining for that host.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NoIdentityAvailable`] if the pool has no
    /// non-banned identity at all.
    pub async fn acquire(&self, host: &str) -> Result<IdentityLease<'_>, IdentityError> {
        let ticket = {
            let mut state = self.state.lock().await;
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.ticket_queue.push_back(ticket);
            ticket
        };

        loop {
            let mut state = self.state.lock().await;
            if state.identities.values().all(|e| e.state == IdentityState::Banned) {
                state.ticket_queue.retain(|t| *t != ticket);
                return Err(IdentityError::NoIdentityAvailable);
            }

            let is_front = state.ticket_queue.front() == Some(&ticket);
            if is_front {
                let now = Instant::now();
                let rate_limit = self.rate_limit;
                let candidate = state
                    .identities
                    .iter()
                    .filter(|(_, e)| e.state == IdentityState::Idle)
                    .filter(|(_, e)| e.cooldown_until.is_none_or(|until| until <= now))
                    .find(|(id, _)| {
                        let bucket = state
                            .buckets
                            .get(&((*id).clone(), host.to_string()))
                            .cloned()
                            .unwrap_or_else(|| TokenBucket::new(rate_limit));
                        bucket.time_until_available(now) == Duration::ZERO
                    })
                    .map(|(id, e)| (id.clone(), e.identity.clone()));

                if let Some((id, identity)) = candidate {
                    let bucket = state
                        .buckets
                        .entry((id.clone(), host.to_string()))
                        .or_insert_with(|| TokenBucket::new(rate_limit));
                    bucket.try_take(now);
                    state.identities.get_mut(&id).unwrap().state = IdentityState::Busy;
                    state.ticket_queue.pop_front();
                    drop(state);
                    self.notify.notify_waiters();
                    return Ok(IdentityLease {
                        pool: self,
                        identity,
                        released: false,
                    });
                }
            }
            drop(state);
            tokio::select! {
                () = self.notify.notified() => {}
                () = tokio::time::sleep(Duration::from_millis(25)) => {}
            }
        }
    }

    async fn release(&self, id: &str, outcome: AcquireOutcome) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.identities.get_mut(id) {
            if entry.state == IdentityState::Busy {
                entry.state = IdentityState::Idle;
            }
            if outcome.is_penalty() {
                entry.consecutive_penalties += 1;
                let cooldown = self.cooldown.duration_for(entry.consecutive_penalties);
                entry.cooldown_until = Some(Instant::now() + cooldown);
                tracing::warn!(
                    target: "marketsync.identity",
                    identity_id = id,
                    consecutive_penalties = entry.consecutive_penalties,
                    cooldown_secs = cooldown.as_secs(),
                    "identity penalized, cooling down"
                );
            } else {
                entry.consecutive_penalties = 0;
                entry.cooldown_until = None;
            }
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Number of non-banned, non-cooling-down identities currently idle.
    pub async fn idle_count(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .await
            .identities
            .values()
            .filter(|e| e.state == IdentityState::Idle && e.cooldown_until.is_none_or(|until| until <= now))
            .count()
    }
}
