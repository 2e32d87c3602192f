// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retry classification for failed task attempts.
//!
//! Same exponential-backoff-with-jitter shape as the ancestor workspace's
//! `abp-host::retry::compute_delay`, layered with the task-class
//! retry/terminal/manual-review decision this system's failure taxonomy adds.

use marketsync_error::{ErrorCategory, ErrorCode};
use std::time::{Duration, SystemTime};

/// Backoff parameters for one task class.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied to the delay on each subsequent retry.
    pub factor: f64,
    /// Cap on any single computed delay.
    pub max_delay: Duration,
    /// Maximum retry attempts for a transient failure.
    pub max_attempts: u32,
    /// Jitter fraction in `[0.0, 1.0]` applied symmetrically around the delay.
    pub jitter: f64,
    /// Maximum retries for an auth/forbidden/captcha failure before
    /// escalating to manual review.
    pub max_auth_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            factor: 2.0,
            max_delay: Duration::from_secs(300),
            max_attempts: 5,
            jitter: 0.25,
            max_auth_attempts: 2,
        }
    }
}

/// The decision for a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// Try again after `delay`.
    Retry {
        /// Backoff delay before the next attempt.
        delay: Duration,
    },
    /// Stop retrying; the task failed irrecoverably.
    Terminal,
    /// Stop automatic retries; surface for an operator to act on.
    ManualReview,
}

/// Classify a failed attempt's next action.
///
/// - *Transient* (`Timeout`, `ServerError`, `TooManyRequests`, `ConnectionError`)
///   retries with backoff up to `policy.max_attempts`.
/// - *Auth/Forbidden/Captcha* retries with backoff up to `policy.max_auth_attempts`,
///   then escalates to [`RetryOutcome::ManualReview`].
/// - *Data* (`Malformed`, `SchemaMismatch`, `ValidationError`, `BadRequest`) never retries.
/// - Anything else in the retryable categories (`Consistency`, `Systemic`) retries
///   like a transient failure.
#[must_use]
pub fn classify(code: ErrorCode, attempt_no: u32, policy: &RetryPolicy) -> RetryOutcome {
    match code {
        ErrorCode::Forbidden | ErrorCode::Captcha => {
            if attempt_no >= policy.max_auth_attempts {
                RetryOutcome::ManualReview
            } else {
                RetryOutcome::Retry {
                    delay: compute_delay(policy, attempt_no),
                }
            }
        }
        _ if code.category() == ErrorCategory::Input || code.category() == ErrorCategory::Data => RetryOutcome::Terminal,
        _ if code.is_retryable() => {
            if attempt_no >= policy.max_attempts {
                RetryOutcome::Terminal
            } else {
                RetryOutcome::Retry {
                    delay: compute_delay(policy, attempt_no),
                }
            }
        }
        _ => RetryOutcome::Terminal,
    }
}

/// Exponential backoff with symmetric jitter, capped at `policy.max_delay`.
#[must_use]
pub fn compute_delay(policy: &RetryPolicy, attempt_no: u32) -> Duration {
    let exp = policy.factor.powi(attempt_no as i32);
    let base_ms = policy.base_delay.as_millis() as f64 * exp;
    let capped_ms = base_ms.min(policy.max_delay.as_millis() as f64);

    if policy.jitter <= 0.0 || capped_ms <= 0.0 {
        return Duration::from_millis(capped_ms as u64);
    }
    let jitter_range = capped_ms * policy.jitter;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let pseudo = nanos.wrapping_mul(u64::from(attempt_no) + 1);
    let offset = if jitter_range > 0.0 {
        (pseudo % jitter_range.max(1.0) as u64) as f64 - jitter_range / 2.0
    } else {
        0.0
    };
    Duration::from_millis((capped_ms + offset).max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_error_retries_then_terminates() {
        let policy = RetryPolicy::default();
        assert!(matches!(classify(ErrorCode::Timeout, 0, &policy), RetryOutcome::Retry { .. }));
        assert_eq!(classify(ErrorCode::Timeout, policy.max_attempts, &policy), RetryOutcome::Terminal);
    }

    #[test]
    fn captcha_escalates_to_manual_review() {
        let policy = RetryPolicy::default();
        assert!(matches!(classify(ErrorCode::Captcha, 0, &policy), RetryOutcome::Retry { .. }));
        assert_eq!(classify(ErrorCode::Captcha, policy.max_auth_attempts, &policy), RetryOutcome::ManualReview);
    }

    #[test]
    fn malformed_data_never_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(classify(ErrorCode::Malformed, 0, &policy), RetryOutcome::Terminal);
        assert_eq!(classify(ErrorCode::ValidationError, 0, &policy), RetryOutcome::Terminal);
    }

    #[test]
    fn delay_grows_with_attempt_and_respects_cap() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let d0 = compute_delay(&policy, 0);
        let d1 = compute_delay(&policy, 1);
        assert!(d1 > d0);
        let d_far = compute_delay(&policy, 30);
        assert!(d_far <= policy.max_delay);
    }
}
