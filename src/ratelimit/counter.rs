//! Per-key rate limit state and window math.
//!
//! A [`CounterState`] holds the algorithm-specific bookkeeping for a single
//! limiter key. All four algorithms are expressed as one `apply` step over
//! `(now, window_ms, max_requests)` so the limiter above can treat them
//! uniformly.

use std::collections::VecDeque;

use super::algorithm::Algorithm;

/// Outcome of a single rate limit check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    /// Whether the request is allowed.
    pub allowed: bool,
    /// Additional requests the key can make right now.
    pub remaining: u32,
    /// Milliseconds until a retry can succeed. Present only when denied.
    pub retry_after_ms: Option<u64>,
    /// Instant (clock milliseconds) at which the key's quota fully resets.
    pub reset_at_ms: u64,
}

/// Algorithm-specific state for one limiter key.
#[derive(Debug, Clone)]
pub enum CounterState {
    /// Counter within the current fixed window.
    FixedWindow {
        /// Requests counted in the current window.
        count: u32,
        /// When the current window opened.
        window_start: u64,
    },
    /// Request instants within the trailing window, oldest first.
    SlidingWindow {
        /// Timestamps of requests still inside the window.
        timestamps: VecDeque<u64>,
    },
    /// Continuously refilling token bucket.
    TokenBucket {
        /// Tokens currently available, at most `max_requests`.
        tokens: f64,
        /// Last refill instant.
        last_refill: u64,
    },
    /// Continuously draining leaky bucket.
    LeakyBucket {
        /// Current fill level, at least zero.
        level: f64,
        /// Last leak instant.
        last_leak: u64,
    },
}

impl CounterState {
    /// Create fresh state for a key that has never been checked.
    ///
    /// A new token bucket starts full; a new leaky bucket starts empty.
    pub fn new(algorithm: Algorithm, now: u64, max_requests: u32) -> Self {
        match algorithm {
            Algorithm::FixedWindow => CounterState::FixedWindow {
                count: 0,
                window_start: now,
            },
            Algorithm::SlidingWindow => CounterState::SlidingWindow {
                timestamps: VecDeque::new(),
            },
            Algorithm::TokenBucket => CounterState::TokenBucket {
                tokens: max_requests as f64,
                last_refill: now,
            },
            Algorithm::LeakyBucket => CounterState::LeakyBucket {
                level: 0.0,
                last_leak: now,
            },
        }
    }

    /// Apply one request to this key's state and produce the check outcome.
    pub fn apply(&mut self, now: u64, window_ms: u64, max_requests: u32) -> CheckResult {
        match self {
            CounterState::FixedWindow {
                count,
                window_start,
            } => {
                if now.saturating_sub(*window_start) > window_ms {
                    *count = 0;
                    *window_start = now;
                }

                let reset_at_ms = *window_start + window_ms;
                if *count < max_requests {
                    *count += 1;
                    CheckResult {
                        allowed: true,
                        remaining: max_requests - *count,
                        retry_after_ms: None,
                        reset_at_ms,
                    }
                } else {
                    let elapsed = now.saturating_sub(*window_start);
                    CheckResult {
                        allowed: false,
                        remaining: 0,
                        retry_after_ms: Some(window_ms.saturating_sub(elapsed)),
                        reset_at_ms,
                    }
                }
            }

            CounterState::SlidingWindow { timestamps } => {
                while let Some(&oldest) = timestamps.front() {
                    if now.saturating_sub(oldest) > window_ms {
                        timestamps.pop_front();
                    } else {
                        break;
                    }
                }

                if (timestamps.len() as u32) < max_requests {
                    timestamps.push_back(now);
                    let oldest = *timestamps.front().unwrap_or(&now);
                    CheckResult {
                        allowed: true,
                        remaining: max_requests - timestamps.len() as u32,
                        retry_after_ms: None,
                        reset_at_ms: oldest + window_ms,
                    }
                } else {
                    let oldest = *timestamps.front().unwrap_or(&now);
                    let retry = window_ms.saturating_sub(now.saturating_sub(oldest));
                    CheckResult {
                        allowed: false,
                        remaining: 0,
                        retry_after_ms: Some(retry),
                        reset_at_ms: oldest + window_ms,
                    }
                }
            }

            CounterState::TokenBucket {
                tokens,
                last_refill,
            } => {
                let capacity = max_requests as f64;
                let rate = capacity / window_ms as f64;
                let elapsed = now.saturating_sub(*last_refill) as f64;
                *tokens = (*tokens + elapsed * rate).min(capacity);
                *last_refill = now;

                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    let until_full = ((capacity - *tokens) / rate).ceil() as u64;
                    CheckResult {
                        allowed: true,
                        remaining: tokens.floor() as u32,
                        retry_after_ms: None,
                        reset_at_ms: now + until_full,
                    }
                } else {
                    let retry = ((1.0 - *tokens) / rate).ceil() as u64;
                    CheckResult {
                        allowed: false,
                        remaining: 0,
                        retry_after_ms: Some(retry),
                        reset_at_ms: now + retry,
                    }
                }
            }

            CounterState::LeakyBucket { level, last_leak } => {
                let capacity = max_requests as f64;
                let rate = capacity / window_ms as f64;
                let elapsed = now.saturating_sub(*last_leak) as f64;
                *level = (*level - elapsed * rate).max(0.0);
                *last_leak = now;

                if *level < capacity {
                    *level += 1.0;
                    let until_empty = (*level / rate).ceil() as u64;
                    CheckResult {
                        allowed: true,
                        remaining: max_requests.saturating_sub(level.ceil() as u32),
                        retry_after_ms: None,
                        reset_at_ms: now + until_empty,
                    }
                } else {
                    let retry = ((*level - capacity + 1.0) / rate).ceil() as u64;
                    let until_empty = (*level / rate).ceil() as u64;
                    CheckResult {
                        allowed: false,
                        remaining: 0,
                        retry_after_ms: Some(retry),
                        reset_at_ms: now + until_empty,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: u64 = 1_000;
    const MAX: u32 = 5;

    #[test]
    fn test_fixed_window_counts_down_then_denies() {
        let mut state = CounterState::new(Algorithm::FixedWindow, 0, MAX);

        for expected_remaining in (0..MAX).rev() {
            let result = state.apply(10, WINDOW, MAX);
            assert!(result.allowed);
            assert_eq!(result.remaining, expected_remaining);
            assert_eq!(result.retry_after_ms, None);
        }

        let denied = state.apply(10, WINDOW, MAX);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after_ms.unwrap() > 0);
        assert_eq!(denied.reset_at_ms, WINDOW);
    }

    #[test]
    fn test_fixed_window_resets_after_window() {
        let mut state = CounterState::new(Algorithm::FixedWindow, 0, MAX);
        for _ in 0..MAX {
            state.apply(0, WINDOW, MAX);
        }
        assert!(!state.apply(0, WINDOW, MAX).allowed);

        let result = state.apply(WINDOW + 1, WINDOW, MAX);
        assert!(result.allowed);
        assert_eq!(result.remaining, MAX - 1);
    }

    #[test]
    fn test_sliding_window_expires_old_timestamps() {
        let mut state = CounterState::new(Algorithm::SlidingWindow, 0, MAX);

        for _ in 0..3 {
            assert!(state.apply(0, WINDOW, MAX).allowed);
        }
        // Half a window later there is room for the final two.
        for _ in 0..2 {
            assert!(state.apply(WINDOW / 2, WINDOW, MAX).allowed);
        }
        assert!(!state.apply(WINDOW / 2, WINDOW, MAX).allowed);

        // Past the first burst's window, those three slots free up.
        let result = state.apply(WINDOW + 1, WINDOW, MAX);
        assert!(result.allowed);
    }

    #[test]
    fn test_sliding_window_retry_tracks_oldest() {
        let mut state = CounterState::new(Algorithm::SlidingWindow, 0, MAX);
        for _ in 0..MAX {
            state.apply(100, WINDOW, MAX);
        }

        let denied = state.apply(300, WINDOW, MAX);
        assert!(!denied.allowed);
        // Oldest sample is at t=100, so it exits the window at t=1100.
        assert_eq!(denied.retry_after_ms, Some(800));
        assert_eq!(denied.reset_at_ms, 100 + WINDOW);
    }

    #[test]
    fn test_token_bucket_starts_full_and_exhausts() {
        let mut state = CounterState::new(Algorithm::TokenBucket, 0, MAX);

        for _ in 0..MAX {
            assert!(state.apply(0, WINDOW, MAX).allowed);
        }
        let denied = state.apply(0, WINDOW, MAX);
        assert!(!denied.allowed);
        assert!(denied.retry_after_ms.unwrap() > 0);
    }

    #[test]
    fn test_token_bucket_refills_at_rate() {
        let mut state = CounterState::new(Algorithm::TokenBucket, 0, MAX);
        for _ in 0..MAX {
            state.apply(0, WINDOW, MAX);
        }

        // Half a window refills roughly half the capacity: 2.5 tokens,
        // so one is spent and two remain after the check.
        let result = state.apply(WINDOW / 2, WINDOW, MAX);
        assert!(result.allowed);
        assert_eq!(result.remaining, 1);

        assert!(state.apply(WINDOW / 2, WINDOW, MAX).allowed);
    }

    #[test]
    fn test_leaky_bucket_fills_then_overflows() {
        let mut state = CounterState::new(Algorithm::LeakyBucket, 0, MAX);

        for _ in 0..MAX {
            assert!(state.apply(0, WINDOW, MAX).allowed);
        }
        let denied = state.apply(0, WINDOW, MAX);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[test]
    fn test_leaky_bucket_drains_at_rate() {
        let mut state = CounterState::new(Algorithm::LeakyBucket, 0, MAX);
        for _ in 0..MAX {
            state.apply(0, WINDOW, MAX);
        }

        // Half a window leaks roughly half the capacity.
        let result = state.apply(WINDOW / 2, WINDOW, MAX);
        assert!(result.allowed);

        let result = state.apply(WINDOW / 2, WINDOW, MAX);
        assert!(result.allowed);
    }

    #[test]
    fn test_denied_result_never_reports_remaining() {
        let mut state = CounterState::new(Algorithm::FixedWindow, 0, 1);
        state.apply(0, WINDOW, 1);
        let denied = state.apply(0, WINDOW, 1);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }
}
