//! Behavioral abuse detection and escalation.

mod detector;
mod pattern;

pub use detector::{AbuseCallback, AbuseDetector, AbuseEvent, AbuseStats};
pub use pattern::{validate_patterns, AbusePattern, ActionKind, Severity};
