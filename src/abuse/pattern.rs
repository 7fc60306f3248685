//! Abuse pattern configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{Result, TollgateError};

/// How serious a triggered pattern is considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// The response tier taken when a pattern fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Record only.
    Log,
    /// Surface a non-blocking warning.
    Warn,
    /// Temporarily block the identifier.
    Block,
    /// Permanently ban the identifier until an explicit reset.
    Ban,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Log => "log",
            ActionKind::Warn => "warn",
            ActionKind::Block => "block",
            ActionKind::Ban => "ban",
        };
        write!(f, "{}", name)
    }
}

/// A named abuse pattern: fire when `threshold` events of type `name`
/// arrive within the trailing `window_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbusePattern {
    /// The event type this pattern counts. Open string key so callers can
    /// define custom event types beyond any built-in set.
    pub name: String,
    /// Event count at which the pattern fires.
    pub threshold: u32,
    /// Trailing window the count is evaluated over.
    pub window_ms: u64,
    /// Severity attached to the escalation event.
    pub severity: Severity,
    /// Action taken when the pattern fires.
    pub action: ActionKind,
}

/// Validate a pattern set: names must be non-empty and unique, thresholds
/// and windows positive.
pub fn validate_patterns(patterns: &[AbusePattern]) -> Result<()> {
    let mut seen = HashSet::new();
    for pattern in patterns {
        if pattern.name.is_empty() {
            return Err(TollgateError::Config(
                "Abuse pattern name must not be empty".to_string(),
            ));
        }
        if !seen.insert(pattern.name.as_str()) {
            return Err(TollgateError::Config(format!(
                "Duplicate abuse pattern name: {}",
                pattern.name
            )));
        }
        if pattern.threshold == 0 {
            return Err(TollgateError::Config(format!(
                "Abuse pattern {} threshold must be positive",
                pattern.name
            )));
        }
        if pattern.window_ms == 0 {
            return Err(TollgateError::Config(format!(
                "Abuse pattern {} window_ms must be positive",
                pattern.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(name: &str) -> AbusePattern {
        AbusePattern {
            name: name.to_string(),
            threshold: 3,
            window_ms: 1_000,
            severity: Severity::Medium,
            action: ActionKind::Warn,
        }
    }

    #[test]
    fn test_valid_patterns_pass() {
        assert!(validate_patterns(&[pattern("rapid_click"), pattern("form_spam")]).is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(
            validate_patterns(&[pattern("")]),
            Err(TollgateError::Config(_))
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        assert!(matches!(
            validate_patterns(&[pattern("rapid_click"), pattern("rapid_click")]),
            Err(TollgateError::Config(_))
        ));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut bad = pattern("rapid_click");
        bad.threshold = 0;
        assert!(validate_patterns(&[bad]).is_err());
    }

    #[test]
    fn test_parse_pattern_yaml() {
        let yaml = r#"
name: rapid_click
threshold: 10
window_ms: 5000
severity: high
action: block
"#;
        let pattern: AbusePattern = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(pattern.name, "rapid_click");
        assert_eq!(pattern.severity, Severity::High);
        assert_eq!(pattern.action, ActionKind::Block);
    }
}
