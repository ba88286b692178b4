//! Client identity rotation and request pacing.
//!
//! Every request goes out with a user agent drawn from a small pool of real
//! desktop browsers, and after a randomized pause. Both are behind the
//! [`IdentityPolicy`] trait so tests can swap in [`FixedIdentity`].

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Browser identities handed out by [`RandomIdentity`]
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:123.0) Gecko/20100101 Firefox/123.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/123.0.2420.53 Safari/537.36",
];

/// Inclusive-exclusive bounds for a randomized pause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub const fn from_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    /// A range that never sleeps
    pub const fn zero() -> Self {
        Self::from_millis(0, 0)
    }
}

/// Pause before a navigation and between element reads
pub const DEFAULT_REQUEST_DELAY: DelayRange = DelayRange::from_millis(1000, 3000);

/// Pause between polls while waiting for a redirect to settle
pub const DEFAULT_POLL_DELAY: DelayRange = DelayRange::from_millis(1000, 2000);

/// Source of user agents and request pacing.
#[async_trait]
pub trait IdentityPolicy: Send + Sync {
    /// User agent for the next request or browser page
    fn next_user_agent(&self) -> String;

    /// Duration to wait, somewhere in `[min, max)`
    fn next_delay(&self, min: Duration, max: Duration) -> Duration;

    /// Sleep for a duration drawn from `range`
    async fn pause(&self, range: DelayRange) {
        let delay = self.next_delay(range.min, range.max);
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "Pacing delay");
            tokio::time::sleep(delay).await;
        }
    }
}

/// Uniformly random identity and delay.
///
/// Uses the thread-local RNG, so a single instance can be shared between
/// workers without extra locking.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdentity;

impl IdentityPolicy for RandomIdentity {
    fn next_user_agent(&self) -> String {
        USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
            .to_string()
    }

    fn next_delay(&self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..max)
    }
}

/// Deterministic identity with no pacing, for tests and local mirrors
#[derive(Debug, Clone)]
pub struct FixedIdentity {
    user_agent: String,
}

impl FixedIdentity {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

impl Default for FixedIdentity {
    fn default() -> Self {
        Self::new(USER_AGENTS[0])
    }
}

impl IdentityPolicy for FixedIdentity {
    fn next_user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn next_delay(&self, _min: Duration, _max: Duration) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_user_agent_from_pool() {
        let identity = RandomIdentity;
        for _ in 0..20 {
            let ua = identity.next_user_agent();
            assert!(USER_AGENTS.contains(&ua.as_str()));
        }
    }

    #[test]
    fn test_random_delay_within_bounds() {
        let identity = RandomIdentity;
        let min = Duration::from_millis(10);
        let max = Duration::from_millis(20);
        for _ in 0..50 {
            let delay = identity.next_delay(min, max);
            assert!(delay >= min && delay < max, "delay out of range: {:?}", delay);
        }
    }

    #[test]
    fn test_degenerate_range_returns_min() {
        let identity = RandomIdentity;
        let d = Duration::from_millis(5);
        assert_eq!(identity.next_delay(d, d), d);
        assert_eq!(identity.next_delay(d, Duration::from_millis(1)), d);
    }

    #[tokio::test]
    async fn test_fixed_identity_never_sleeps() {
        let identity = FixedIdentity::new("test-agent");
        assert_eq!(identity.next_user_agent(), "test-agent");
        let started = std::time::Instant::now();
        identity.pause(DelayRange::from_millis(5000, 6000)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
