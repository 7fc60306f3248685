//! Rate limiting algorithm selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TollgateError;

/// The algorithm a rate limiter uses to evaluate its quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Counter that resets at fixed window boundaries.
    FixedWindow,
    /// Trailing window over individual request timestamps.
    SlidingWindow,
    /// Capacity that refills continuously at `max_requests / window` per ms.
    TokenBucket,
    /// Capacity that drains continuously at `max_requests / window` per ms.
    LeakyBucket,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::LeakyBucket => "leaky_bucket",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Algorithm {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed_window" => Ok(Algorithm::FixedWindow),
            "sliding_window" => Ok(Algorithm::SlidingWindow),
            "token_bucket" => Ok(Algorithm::TokenBucket),
            "leaky_bucket" => Ok(Algorithm::LeakyBucket),
            other => Err(TollgateError::Config(format!(
                "Unsupported rate limiting algorithm: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_roundtrip() {
        for algorithm in [
            Algorithm::FixedWindow,
            Algorithm::SlidingWindow,
            Algorithm::TokenBucket,
            Algorithm::LeakyBucket,
        ] {
            let parsed: Algorithm = algorithm.to_string().parse().unwrap();
            assert_eq!(parsed, algorithm);
        }
    }

    #[test]
    fn test_unknown_algorithm_is_config_error() {
        let result = "random_drop".parse::<Algorithm>();
        assert!(matches!(result, Err(TollgateError::Config(_))));
    }

    #[test]
    fn test_algorithm_deserializes_from_snake_case() {
        let algorithm: Algorithm = serde_yaml::from_str("token_bucket").unwrap();
        assert_eq!(algorithm, Algorithm::TokenBucket);
    }
}
