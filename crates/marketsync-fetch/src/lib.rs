// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Retrying HTTP fetch: exponential backoff with jitter, a typed failure
//! taxonomy, and a `robots.txt` cache consulted before every request.
//!
//! The retry loop is adapted from the ancestor workspace's `retry_async`
//! (`abp-host::retry`): same backoff/jitter/overall-timeout shape, different
//! retryability predicate and a `reqwest` body instead of a sidecar spawn.

use marketsync_identity::{AcquireOutcome, Identity, IdentityPool};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Typed fetch failures, mapped onto [`marketsync_error::ErrorCode`] by callers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// The request did not complete within its timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },
    /// The connection could not be established.
    #[error("could not connect to {url}: {reason}")]
    ConnectionError {
        /// The URL that could not be reached.
        url: String,
        /// Underlying error text.
        reason: String,
    },
    /// The origin returned a 5xx.
    #[error("server error {status} from {url}")]
    ServerError {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// The origin returned 429.
    #[error("rate limited by {url}")]
    TooManyRequests {
        /// The URL that rate-limited us.
        url: String,
    },
    /// The response body matched a known captcha/anti-bot challenge shape.
    #[error("captcha challenge served by {url}")]
    Captcha {
        /// The URL that served the challenge.
        url: String,
    },
    /// The origin returned 403.
    #[error("forbidden by {url}")]
    Forbidden {
        /// The URL that denied us.
        url: String,
    },
    /// `robots.txt` disallows this path.
    #[error("disallowed by robots.txt: {url}")]
    RobotsDisallowed {
        /// The URL that is disallowed.
        url: String,
    },
}

impl FetchError {
    /// Whether a fresh attempt is worth making.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::ConnectionError { .. }
                | Self::ServerError { .. }
                | Self::TooManyRequests { .. }
        )
    }

    /// The identity-pool penalty this failure implies, per the `{blocked, captcha,
    /// 429, 5xx}` cooldown triggers. Network-level failures (timeout, connection
    /// refused) are not attributed to the identity and report success.
    fn acquire_outcome(&self) -> AcquireOutcome {
        match self {
            Self::Forbidden { .. } => AcquireOutcome::Blocked,
            Self::Captcha { .. } => AcquireOutcome::Captcha,
            Self::TooManyRequests { .. } => AcquireOutcome::TooManyRequests,
            Self::ServerError { .. } => AcquireOutcome::ServerError,
            Self::Timeout { .. } | Self::ConnectionError { .. } | Self::RobotsDisallowed { .. } => AcquireOutcome::Success,
        }
    }
}

/// Backoff/timeout configuration for [`Fetcher::fetch`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts after the initial one.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Cap on any single backoff delay.
    pub max_delay: Duration,
    /// Wall-clock budget across all attempts.
    pub overall_timeout: Duration,
    /// Jitter fraction in `[0.0, 1.0]`.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            overall_timeout: Duration::from_secs(120),
            jitter_factor: 0.4,
        }
    }
}

/// Compute the backoff delay for a zero-indexed attempt.
#[must_use]
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let backoff_ms = (config.base_delay.as_millis() as u64).saturating_mul(2u64.saturating_pow(attempt));
    let capped_ms = backoff_ms.min(config.max_delay.as_millis() as u64);

    let jitter_factor = config.jitter_factor.clamp(0.0, 1.0);
    if jitter_factor == 0.0 || capped_ms == 0 {
        return Duration::from_millis(capped_ms);
    }

    // Full jitter within the top `jitter_factor` slice of the nominal delay:
    // pick uniformly from [floor, capped] rather than always trimming off a
    // fixed amount, so concurrent retries of the same host spread out more.
    let floor_ms = (capped_ms as f64 * (1.0 - jitter_factor)) as u64;
    let spread = capped_ms - floor_ms;
    let roll = fetch_jitter_roll(attempt) % (spread + 1);
    Duration::from_millis(floor_ms + roll)
}

/// A cheap, non-cryptographic 64-bit roll derived from the wall clock and
/// `attempt`, xorshifted to spread the clock's low-entropy bits across the
/// whole word before it's reduced modulo the jitter spread.
fn fetch_jitter_roll(attempt: u32) -> u64 {
    let nanos = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;
    let mut x = nanos ^ (u64::from(attempt).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

/// A fetched page: status, final URL (after redirects), and body text.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// HTTP status code.
    pub status: u16,
    /// URL after following redirects.
    pub final_url: String,
    /// Response body.
    pub body: String,
}

struct RobotsCache {
    entries: Mutex<HashMap<String, RobotsRules>>,
}

#[derive(Clone)]
struct RobotsRules {
    disallow: Vec<String>,
}

impl RobotsRules {
    fn allows(&self, path: &str) -> bool {
        !self.disallow.iter().any(|rule| !rule.is_empty() && path.starts_with(rule))
    }

    fn parse(body: &str) -> Self {
        let mut disallow = Vec::new();
        let mut applies = false;
        for line in body.lines() {
            let line = line.trim();
            if let Some(rest) = line.to_lowercase().strip_prefix("user-agent:") {
                applies = rest.trim() == "*";
            } else if applies {
                if let Some(rest) = line.to_lowercase().strip_prefix("disallow:") {
                    disallow.push(rest.trim().to_string());
                }
            }
        }
        Self { disallow }
    }
}

/// Issues HTTP GET requests through a rate-limited [`IdentityPool`], retrying
/// transient failures with exponential backoff, and honoring `robots.txt`.
pub struct Fetcher {
    client: reqwest::Client,
    identities: std::sync::Arc<IdentityPool>,
    robots: RobotsCache,
    respect_robots: bool,
}

impl Fetcher {
    /// Construct a fetcher backed by the given identity pool.
    #[must_use]
    pub fn new(identities: std::sync::Arc<IdentityPool>, respect_robots: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            identities,
            robots: RobotsCache {
                entries: Mutex::new(HashMap::new()),
            },
            respect_robots,
        }
    }

    async fn robots_allows(&self, url: &url::Url) -> bool {
        if !self.respect_robots {
            return true;
        }
        let origin = format!("{}://{}", url.scheme(), url.authority());
        let cached = self.robots.entries.lock().expect("robots cache poisoned").get(&origin).cloned();
        let rules = match cached {
            Some(rules) => rules,
            None => {
                let robots_url = format!("{origin}/robots.txt");
                let rules = match self.client.get(&robots_url).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        let body = resp.text().await.unwrap_or_default();
                        RobotsRules::parse(&body)
                    }
                    _ => RobotsRules { disallow: vec![] },
                };
                self.robots
                    .entries
                    .lock()
                    .expect("robots cache poisoned")
                    .insert(origin, rules.clone());
                rules
            }
        };
        rules.allows(url.path())
    }

    fn host_of(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string())
    }

    /// Fetch `target`, retrying transient failures per `config`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::RobotsDisallowed`] without ever sending a request if
    /// `robots.txt` disallows the path, and the last encountered [`FetchError`]
    /// once retries are exhausted.
    pub async fn fetch(&self, target: &str, config: &RetryConfig) -> Result<FetchedPage, FetchError> {
        let parsed = url::Url::parse(target).map_err(|_| FetchError::ConnectionError {
            url: target.to_string(),
            reason: "unparseable URL".to_string(),
        })?;
        if !self.robots_allows(&parsed).await {
            return Err(FetchError::RobotsDisallowed {
                url: target.to_string(),
            });
        }

        let host = Self::host_of(target);
        let start = Instant::now();
        let max_attempts = config.max_retries + 1;
        let mut last_err = None;

        for attempt in 0..max_attempts {
            if start.elapsed() >= config.overall_timeout {
                return Err(last_err.unwrap_or(FetchError::Timeout {
                    url: target.to_string(),
                }));
            }

            let lease = match self.identities.acquire(&host).await {
                Ok(lease) => lease,
                Err(_) => {
                    return Err(last_err.unwrap_or(FetchError::ConnectionError {
                        url: target.to_string(),
                        reason: "no identity available".to_string(),
                    }));
                }
            };

            debug!(target: "marketsync.fetch", url = target, attempt, "attempting fetch");
            let outcome = self.attempt_once(target, lease.identity()).await;
            let acquire_outcome = outcome.as_ref().map_or_else(FetchError::acquire_outcome, |_| AcquireOutcome::Success);
            lease.release(acquire_outcome).await;

            match outcome {
                Ok(page) => return Ok(page),
                Err(err) => {
                    let is_last = attempt + 1 >= max_attempts;
                    if !err.is_retryable() || is_last {
                        warn!(target: "marketsync.fetch", url = target, %err, "giving up");
                        return Err(err);
                    }
                    let delay = compute_delay(config, attempt);
                    warn!(target: "marketsync.fetch", url = target, %err, delay_ms = delay.as_millis() as u64, "retrying");
                    last_err = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(last_err.unwrap_or(FetchError::Timeout {
            url: target.to_string(),
        }))
    }

    async fn attempt_once(&self, target: &str, identity: &Identity) -> Result<FetchedPage, FetchError> {
        let mut builder = self.client.get(target).header("User-Agent", &identity.user_agent);
        if let Some(proxy) = &identity.proxy {
            if let Ok(p) = reqwest::Proxy::all(proxy) {
                builder = reqwest::Client::builder()
                    .proxy(p)
                    .build()
                    .map(|c| c.get(target).header("User-Agent", &identity.user_agent))
                    .unwrap_or(builder);
            }
        }
        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout { url: target.to_string() }
            } else {
                FetchError::ConnectionError {
                    url: target.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        match status {
            403 => return Err(FetchError::Forbidden { url: target.to_string() }),
            429 => return Err(FetchError::TooManyRequests { url: target.to_string() }),
            500..=599 => return Err(FetchError::ServerError { url: target.to_string(), status }),
            _ => {}
        }

        let body = resp.text().await.map_err(|e| FetchError::ConnectionError {
            url: target.to_string(),
            reason: e.to_string(),
        })?;

        if looks_like_captcha(&body) {
            return Err(FetchError::Captcha { url: target.to_string() });
        }

        Ok(FetchedPage { status, final_url, body })
    }
}

fn looks_like_captcha(body: &str) -> bool {
    let lowered = body.to_lowercase();
    lowered.contains("captcha") && lowered.len() < 20_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let config = RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        let d0 = compute_delay(&config, 0);
        let d1 = compute_delay(&config, 1);
        let d_big = compute_delay(&config, 20);
        assert!(d1 > d0);
        assert_eq!(d_big, config.max_delay);
    }

    #[test]
    fn robots_rules_respect_disallow_prefix() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /private\n");
        assert!(!rules.allows("/private/data"));
        assert!(rules.allows("/public"));
    }

    #[test]
    fn robots_rules_ignore_other_user_agents() {
        let rules = RobotsRules::parse("User-agent: otherbot\nDisallow: /\n");
        assert!(rules.allows("/anything"));
    }

    #[test]
    fn captcha_detection_is_bounded() {
        assert!(looks_like_captcha("please solve this captcha"));
        assert!(!looks_like_captcha(&"x".repeat(30_000)));
    }
}
