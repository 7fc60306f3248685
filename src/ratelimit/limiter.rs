//! Core rate limiter implementation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::error::{Result, TollgateError};

use super::counter::{CheckResult, CounterState};

/// Remaps an identifier to the limiter key its quota is tracked under.
pub type KeyGenerator = Box<dyn Fn(&str) -> String + Send + Sync>;

/// State tracked for one limiter key.
struct KeyEntry {
    state: CounterState,
    last_result: Option<CheckResult>,
}

/// A rate limiter enforcing one quota with one configured algorithm.
///
/// Per-key state is created lazily on first check and never shared between
/// keys. The limiter is thread-safe and can be shared across tasks.
pub struct RateLimiter {
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    key_generator: Option<KeyGenerator>,
    /// Per-key counter state and last computed result.
    keys: RwLock<HashMap<String, KeyEntry>>,
}

impl RateLimiter {
    /// Create a rate limiter with the system clock.
    ///
    /// Fails fast with a configuration error when the window or quota is
    /// zero; an unrecognized algorithm never reaches this point because it
    /// is rejected when the [`LimiterConfig`] is parsed.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a rate limiter against an injected clock.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.window_ms == 0 {
            return Err(TollgateError::Config(
                "Rate limiter window_ms must be positive".to_string(),
            ));
        }
        if config.max_requests == 0 {
            return Err(TollgateError::Config(
                "Rate limiter max_requests must be positive".to_string(),
            ));
        }

        Ok(Self {
            config,
            clock,
            key_generator: None,
            keys: RwLock::new(HashMap::new()),
        })
    }

    /// Install a key generator that remaps identifiers to limiter keys.
    pub fn with_key_generator(mut self, generator: KeyGenerator) -> Self {
        self.key_generator = Some(generator);
        self
    }

    /// The immutable configuration this limiter was built with.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    fn resolve_key(&self, identifier: &str) -> String {
        match &self.key_generator {
            Some(generator) => generator(identifier),
            None => identifier.to_string(),
        }
    }

    /// Check whether `identifier` may perform the operation now.
    ///
    /// Applies the configured algorithm to the key's state and records the
    /// result so [`RateLimiter::status`] can report it without re-checking.
    pub fn check(&self, identifier: &str) -> CheckResult {
        let key = self.resolve_key(identifier);
        let now = self.clock.now_ms();

        trace!(key = %key, algorithm = %self.config.algorithm, "Checking rate limit");

        let mut keys = self.keys.write();
        let entry = keys.entry(key.clone()).or_insert_with(|| {
            debug!(
                key = %key,
                algorithm = %self.config.algorithm,
                max_requests = self.config.max_requests,
                window_ms = self.config.window_ms,
                "Creating rate limit state"
            );
            KeyEntry {
                state: CounterState::new(self.config.algorithm, now, self.config.max_requests),
                last_result: None,
            }
        });

        let result = entry
            .state
            .apply(now, self.config.window_ms, self.config.max_requests);
        entry.last_result = Some(result.clone());

        if !result.allowed {
            debug!(
                key = %key,
                retry_after_ms = ?result.retry_after_ms,
                "Rate limit exceeded"
            );
        }

        result
    }

    /// The most recently computed result for `identifier`, without mutating
    /// any state. `None` when the key has never been checked.
    pub fn status(&self, identifier: &str) -> Option<CheckResult> {
        let key = self.resolve_key(identifier);
        let keys = self.keys.read();
        keys.get(&key).and_then(|entry| entry.last_result.clone())
    }

    /// Forget everything about `identifier`, as if it had never been seen.
    pub fn reset(&self, identifier: &str) {
        let key = self.resolve_key(identifier);
        let mut keys = self.keys.write();
        if keys.remove(&key).is_some() {
            debug!(key = %key, "Rate limit state reset");
        }
    }

    /// Drop all per-key state.
    pub fn clear(&self) {
        self.keys.write().clear();
    }

    /// The number of keys with live state.
    pub fn key_count(&self) -> usize {
        self.keys.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::Algorithm;

    fn limiter(algorithm: Algorithm, clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::with_clock(
            LimiterConfig {
                window_ms: 1_000,
                max_requests: 5,
                algorithm,
            },
            clock,
        )
        .unwrap()
    }

    #[test]
    fn test_zero_window_rejected_at_construction() {
        let result = RateLimiter::new(LimiterConfig {
            window_ms: 0,
            max_requests: 5,
            algorithm: Algorithm::FixedWindow,
        });
        assert!(matches!(result, Err(TollgateError::Config(_))));
    }

    #[test]
    fn test_zero_quota_rejected_at_construction() {
        let result = RateLimiter::new(LimiterConfig {
            window_ms: 1_000,
            max_requests: 0,
            algorithm: Algorithm::SlidingWindow,
        });
        assert!(matches!(result, Err(TollgateError::Config(_))));
    }

    #[test]
    fn test_check_creates_state_lazily() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(Algorithm::FixedWindow, clock);

        assert_eq!(limiter.key_count(), 0);
        assert!(limiter.check("user-1").allowed);
        assert_eq!(limiter.key_count(), 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(Algorithm::FixedWindow, clock);

        for _ in 0..5 {
            assert!(limiter.check("user-1").allowed);
        }
        assert!(!limiter.check("user-1").allowed);
        assert!(limiter.check("user-2").allowed);
    }

    #[test]
    fn test_status_reports_last_result_without_mutation() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(Algorithm::FixedWindow, clock);

        assert_eq!(limiter.status("user-1"), None);

        let checked = limiter.check("user-1");
        let status = limiter.status("user-1").unwrap();
        assert_eq!(status, checked);

        // Status must not consume quota.
        for _ in 0..100 {
            limiter.status("user-1");
        }
        assert_eq!(limiter.status("user-1").unwrap().remaining, 4);
    }

    #[test]
    fn test_reset_restores_full_quota() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(Algorithm::FixedWindow, clock);

        for _ in 0..5 {
            limiter.check("user-1");
        }
        assert!(!limiter.check("user-1").allowed);

        limiter.reset("user-1");
        assert_eq!(limiter.status("user-1"), None);

        let result = limiter.check("user-1");
        assert!(result.allowed);
        assert_eq!(result.remaining, 4);
    }

    #[test]
    fn test_key_generator_collapses_identifiers() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(Algorithm::FixedWindow, clock).with_key_generator(Box::new(
            |identifier: &str| identifier.split(':').next().unwrap_or(identifier).to_string(),
        ));

        for _ in 0..5 {
            assert!(limiter.check("tenant-a:session-1").allowed);
        }
        // Same tenant through a different session shares the quota.
        assert!(!limiter.check("tenant-a:session-2").allowed);
        assert_eq!(limiter.key_count(), 1);
    }

    #[test]
    fn test_window_elapse_restores_quota() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(Algorithm::SlidingWindow, clock.clone());

        for _ in 0..5 {
            limiter.check("user-1");
        }
        assert!(!limiter.check("user-1").allowed);

        clock.advance(1_001);
        assert!(limiter.check("user-1").allowed);
    }
}
