//! Configuration surface for the Tollgate library.
//!
//! Configurations are plain serde structs loadable from YAML. Scalar fields
//! carry serde defaults so a config file only needs to state what it changes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::abuse::{validate_patterns, AbusePattern};
use crate::error::{Result, TollgateError};
use crate::ratelimit::Algorithm;

/// Configuration for a single rate limiter. Immutable once the limiter is
/// constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Length of the quota window in milliseconds.
    pub window_ms: u64,
    /// Requests allowed per window.
    pub max_requests: u32,
    /// Algorithm used to evaluate the quota.
    pub algorithm: Algorithm,
}

/// A limiter configuration bound to its registry name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedLimiterConfig {
    /// Registry name, unique across the configuration.
    pub name: String,
    /// Length of the quota window in milliseconds.
    pub window_ms: u64,
    /// Requests allowed per window.
    pub max_requests: u32,
    /// Algorithm used to evaluate the quota.
    pub algorithm: Algorithm,
}

impl NamedLimiterConfig {
    /// The limiter configuration without its registry name.
    pub fn limiter(&self) -> LimiterConfig {
        LimiterConfig {
            window_ms: self.window_ms,
            max_requests: self.max_requests,
            algorithm: self.algorithm,
        }
    }
}

/// Configuration for the abuse detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Patterns evaluated against each identifier's event history.
    #[serde(default)]
    pub patterns: Vec<AbusePattern>,

    /// Minimum spacing between processed events for one identifier, across
    /// all event types. Zero disables the cooldown.
    #[serde(default = "default_global_cooldown_ms")]
    pub global_cooldown_ms: u64,

    /// Cap on stored events per identifier; the oldest are dropped first.
    #[serde(default = "default_max_events_per_identifier")]
    pub max_events_per_identifier: usize,

    /// Number of block/ban escalations, across all patterns, after which an
    /// identifier is banned outright.
    #[serde(default = "default_ban_threshold")]
    pub ban_threshold: u32,

    /// How long a temporary block lasts.
    #[serde(default = "default_block_duration_ms")]
    pub block_duration_ms: u64,

    /// Events older than this are swept from history.
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,

    /// How often the maintenance task sweeps old events.
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            global_cooldown_ms: default_global_cooldown_ms(),
            max_events_per_identifier: default_max_events_per_identifier(),
            ban_threshold: default_ban_threshold(),
            block_duration_ms: default_block_duration_ms(),
            retention_ms: default_retention_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

fn default_global_cooldown_ms() -> u64 {
    100
}

fn default_max_events_per_identifier() -> usize {
    1000
}

fn default_ban_threshold() -> u32 {
    5
}

fn default_block_duration_ms() -> u64 {
    5 * 60 * 1000 // 5 minutes
}

fn default_retention_ms() -> u64 {
    24 * 60 * 60 * 1000 // 24 hours
}

fn default_cleanup_interval_ms() -> u64 {
    60 * 1000
}

/// Top-level configuration: the limiter registry plus the abuse detector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Rate limiters, registered in listed order.
    #[serde(default)]
    pub limiters: Vec<NamedLimiterConfig>,

    /// Abuse detector configuration.
    #[serde(default)]
    pub detector: DetectorConfig,
}

impl TollgateConfig {
    /// Load and validate configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading tollgate configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the whole configuration surface.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for named in &self.limiters {
            if named.name.is_empty() {
                return Err(TollgateError::Config(
                    "Rate limiter name must not be empty".to_string(),
                ));
            }
            if !names.insert(named.name.as_str()) {
                return Err(TollgateError::Config(format!(
                    "Duplicate rate limiter name: {}",
                    named.name
                )));
            }
            if named.window_ms == 0 {
                return Err(TollgateError::Config(format!(
                    "Rate limiter {} window_ms must be positive",
                    named.name
                )));
            }
            if named.max_requests == 0 {
                return Err(TollgateError::Config(format!(
                    "Rate limiter {} max_requests must be positive",
                    named.name
                )));
            }
        }

        validate_patterns(&self.detector.patterns)?;

        if self.detector.ban_threshold == 0 {
            return Err(TollgateError::Config(
                "Detector ban_threshold must be positive".to_string(),
            ));
        }
        if self.detector.max_events_per_identifier == 0 {
            return Err(TollgateError::Config(
                "Detector max_events_per_identifier must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abuse::{ActionKind, Severity};

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
limiters:
  - name: api_calls
    window_ms: 60000
    max_requests: 100
    algorithm: sliding_window
  - name: login
    window_ms: 300000
    max_requests: 5
    algorithm: token_bucket
detector:
  global_cooldown_ms: 50
  ban_threshold: 3
  patterns:
    - name: rapid_click
      threshold: 10
      window_ms: 5000
      severity: medium
      action: warn
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiters.len(), 2);
        assert_eq!(config.limiters[0].name, "api_calls");
        assert_eq!(config.limiters[0].algorithm, Algorithm::SlidingWindow);
        assert_eq!(config.detector.global_cooldown_ms, 50);
        assert_eq!(config.detector.ban_threshold, 3);
        // Unstated scalars fall back to defaults.
        assert_eq!(config.detector.block_duration_ms, 300_000);
        assert_eq!(config.detector.retention_ms, 86_400_000);
        assert_eq!(config.detector.patterns[0].severity, Severity::Medium);
        assert_eq!(config.detector.patterns[0].action, ActionKind::Warn);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TollgateConfig::from_yaml("{}").unwrap();
        assert!(config.limiters.is_empty());
        assert_eq!(config.detector.global_cooldown_ms, 100);
        assert_eq!(config.detector.ban_threshold, 5);
    }

    #[test]
    fn test_unknown_algorithm_fails_parse() {
        let yaml = r#"
limiters:
  - name: api_calls
    window_ms: 60000
    max_requests: 100
    algorithm: crystal_ball
"#;
        assert!(matches!(
            TollgateConfig::from_yaml(yaml),
            Err(TollgateError::Config(_))
        ));
    }

    #[test]
    fn test_duplicate_limiter_names_rejected() {
        let yaml = r#"
limiters:
  - name: api
    window_ms: 1000
    max_requests: 10
    algorithm: fixed_window
  - name: api
    window_ms: 2000
    max_requests: 20
    algorithm: fixed_window
"#;
        assert!(matches!(
            TollgateConfig::from_yaml(yaml),
            Err(TollgateError::Config(_))
        ));
    }

    #[test]
    fn test_duplicate_pattern_names_rejected() {
        let yaml = r#"
detector:
  patterns:
    - name: spam
      threshold: 3
      window_ms: 1000
      severity: low
      action: log
    - name: spam
      threshold: 5
      window_ms: 2000
      severity: high
      action: block
"#;
        assert!(matches!(
            TollgateConfig::from_yaml(yaml),
            Err(TollgateError::Config(_))
        ));
    }
}
