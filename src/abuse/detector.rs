//! Behavioral abuse detection engine.
//!
//! The detector consumes typed events per identifier, keeps a rolling
//! history, evaluates configured patterns against that history on every
//! recorded event, and escalates through warn/block/ban actions. Temporary
//! blocks are modeled as expiry timestamps checked on read and swept by the
//! maintenance task, so teardown only has one scheduled task to cancel.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::DetectorConfig;
use crate::error::{Result, TollgateError};

use super::pattern::{validate_patterns, ActionKind, Severity};

/// Event type synthesized when cross-pattern escalations cross the ban
/// threshold.
const BAN_THRESHOLD_EVENT: &str = "ban_threshold_exceeded";

/// One observed (or synthesized) abuse event. Immutable once recorded.
#[derive(Debug, Clone, Serialize)]
pub struct AbuseEvent {
    /// Unique event id.
    pub id: Uuid,
    /// Event type; matches a pattern name for raw events, or carries an
    /// `_abuse` suffix for synthesized escalations.
    pub event_type: String,
    /// When the event was recorded (clock milliseconds).
    pub timestamp_ms: u64,
    /// The actor this event belongs to.
    pub identifier: String,
    /// Opaque caller-supplied context.
    pub details: serde_json::Value,
    /// Severity attached to the event.
    pub severity: Severity,
    /// Action attached to the event.
    pub action: ActionKind,
}

/// Aggregate view over the detector's in-memory state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbuseStats {
    /// All events currently held in history, escalations included.
    pub total_events: usize,
    /// Identifiers with an unexpired temporary block.
    pub blocked_count: usize,
    /// Permanently banned identifiers.
    pub banned_count: usize,
    /// Event counts grouped by type.
    pub events_by_type: HashMap<String, u64>,
}

/// Hook invoked after the detector commits an escalation.
pub type AbuseCallback = Box<dyn Fn(&AbuseEvent) + Send + Sync>;

#[derive(Default)]
struct DetectorState {
    event_history: HashMap<String, VecDeque<AbuseEvent>>,
    /// identifier -> instant the temporary block expires.
    blocked: HashMap<String, u64>,
    banned: HashSet<String>,
    /// identifier -> last processed event instant.
    cooldowns: HashMap<String, u64>,
}

/// The abuse detection engine.
///
/// Thread-safe; a single coarse lock serializes record/query operations so
/// pattern counts always see events in submission order per identifier.
pub struct AbuseDetector {
    config: DetectorConfig,
    clock: Arc<dyn Clock>,
    on_abuse: AbuseCallback,
    state: Mutex<DetectorState>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl AbuseDetector {
    /// Create a detector with the system clock.
    ///
    /// Fails fast when the pattern set or thresholds are invalid.
    pub fn new(config: DetectorConfig, on_abuse: AbuseCallback) -> Result<Self> {
        Self::with_clock(config, on_abuse, Arc::new(SystemClock::new()))
    }

    /// Create a detector against an injected clock.
    pub fn with_clock(
        config: DetectorConfig,
        on_abuse: AbuseCallback,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        validate_patterns(&config.patterns)?;
        if config.ban_threshold == 0 {
            return Err(TollgateError::Config(
                "Detector ban_threshold must be positive".to_string(),
            ));
        }
        if config.max_events_per_identifier == 0 {
            return Err(TollgateError::Config(
                "Detector max_events_per_identifier must be positive".to_string(),
            ));
        }

        Ok(Self {
            config,
            clock,
            on_abuse,
            state: Mutex::new(DetectorState::default()),
            maintenance: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Record one typed event for `identifier` and evaluate abuse patterns
    /// against the updated history.
    ///
    /// Events from banned identifiers are discarded, as are events arriving
    /// inside the identifier's global cooldown. Escalations triggered by
    /// this event invoke the abuse callback after their state changes have
    /// been committed.
    pub fn record_event(&self, event_type: &str, identifier: &str, details: serde_json::Value) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }

        let now = self.clock.now_ms();
        let mut dispatched = Vec::new();

        {
            let mut state = self.state.lock();

            if state.banned.contains(identifier) {
                debug!(identifier = %identifier, event_type = %event_type, "Dropping event from banned identifier");
                return;
            }

            if let Some(&last) = state.cooldowns.get(identifier) {
                if now.saturating_sub(last) < self.config.global_cooldown_ms {
                    trace!(identifier = %identifier, event_type = %event_type, "Dropping event inside cooldown");
                    return;
                }
            }

            let event = AbuseEvent {
                id: Uuid::new_v4(),
                event_type: event_type.to_string(),
                timestamp_ms: now,
                identifier: identifier.to_string(),
                details,
                severity: Severity::Low,
                action: ActionKind::Log,
            };
            Self::append_event(
                &mut state,
                identifier,
                event,
                self.config.max_events_per_identifier,
            );

            self.check_patterns(&mut state, identifier, now, &mut dispatched);

            // A ban during pattern evaluation drops the identifier's
            // cooldown entry; do not resurrect it.
            if !state.banned.contains(identifier) {
                state.cooldowns.insert(identifier.to_string(), now);
            }
        }

        for event in &dispatched {
            self.invoke_callback(event);
        }
    }

    fn append_event(state: &mut DetectorState, identifier: &str, event: AbuseEvent, cap: usize) {
        let history = state.event_history.entry(identifier.to_string()).or_default();
        history.push_back(event);
        while history.len() > cap {
            history.pop_front();
        }
    }

    /// Evaluate every configured pattern, then the cross-pattern ban
    /// threshold, against `identifier`'s history.
    fn check_patterns(
        &self,
        state: &mut DetectorState,
        identifier: &str,
        now: u64,
        dispatched: &mut Vec<AbuseEvent>,
    ) {
        for pattern in &self.config.patterns {
            if state.banned.contains(identifier) {
                break;
            }

            let count = state
                .event_history
                .get(identifier)
                .map(|history| {
                    history
                        .iter()
                        .filter(|event| {
                            event.event_type == pattern.name
                                && now.saturating_sub(event.timestamp_ms) <= pattern.window_ms
                        })
                        .count()
                })
                .unwrap_or(0) as u32;

            if count >= pattern.threshold {
                let event = AbuseEvent {
                    id: Uuid::new_v4(),
                    event_type: format!("{}_abuse", pattern.name),
                    timestamp_ms: now,
                    identifier: identifier.to_string(),
                    details: json!({
                        "pattern": pattern.name,
                        "event_count": count,
                        "threshold": pattern.threshold,
                    }),
                    severity: pattern.severity,
                    action: pattern.action,
                };
                Self::append_event(
                    state,
                    identifier,
                    event.clone(),
                    self.config.max_events_per_identifier,
                );
                self.handle_action(state, &event, now);
                dispatched.push(event);
            }
        }

        if state.banned.contains(identifier) {
            return;
        }

        // An identifier that accumulates enough escalations is banned
        // outright, regardless of which patterns triggered them.
        let escalations = state
            .event_history
            .get(identifier)
            .map(|history| {
                history
                    .iter()
                    .filter(|event| matches!(event.action, ActionKind::Block | ActionKind::Ban))
                    .count()
            })
            .unwrap_or(0) as u32;

        if escalations >= self.config.ban_threshold {
            let event = AbuseEvent {
                id: Uuid::new_v4(),
                event_type: BAN_THRESHOLD_EVENT.to_string(),
                timestamp_ms: now,
                identifier: identifier.to_string(),
                details: json!({
                    "escalations": escalations,
                    "ban_threshold": self.config.ban_threshold,
                }),
                severity: Severity::Critical,
                action: ActionKind::Ban,
            };
            self.handle_action(state, &event, now);
            dispatched.push(event);
        }
    }

    fn handle_action(&self, state: &mut DetectorState, event: &AbuseEvent, now: u64) {
        match event.action {
            ActionKind::Log => {
                debug!(identifier = %event.identifier, event_type = %event.event_type, "Abuse pattern logged");
            }
            ActionKind::Warn => {
                warn!(
                    identifier = %event.identifier,
                    event_type = %event.event_type,
                    severity = ?event.severity,
                    "Abuse warning"
                );
            }
            ActionKind::Block => {
                let until = now + self.config.block_duration_ms;
                state.blocked.insert(event.identifier.clone(), until);
                warn!(
                    identifier = %event.identifier,
                    event_type = %event.event_type,
                    blocked_until_ms = until,
                    "Identifier temporarily blocked"
                );
            }
            ActionKind::Ban => {
                state.banned.insert(event.identifier.clone());
                state.event_history.remove(&event.identifier);
                state.cooldowns.remove(&event.identifier);
                error!(
                    identifier = %event.identifier,
                    event_type = %event.event_type,
                    "Identifier banned"
                );
            }
        }
    }

    fn invoke_callback(&self, event: &AbuseEvent) {
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.on_abuse)(event)));
        if outcome.is_err() {
            warn!(
                identifier = %event.identifier,
                event_type = %event.event_type,
                "Abuse callback panicked; state changes already committed"
            );
        }
    }

    /// Whether `identifier` is currently blocked. A ban implies a block;
    /// an expired temporary block is removed on read.
    pub fn is_blocked(&self, identifier: &str) -> bool {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        if state.banned.contains(identifier) {
            return true;
        }
        match state.blocked.get(identifier) {
            Some(&until) if until > now => true,
            Some(_) => {
                state.blocked.remove(identifier);
                false
            }
            None => false,
        }
    }

    /// Whether `identifier` is permanently banned.
    pub fn is_banned(&self, identifier: &str) -> bool {
        self.state.lock().banned.contains(identifier)
    }

    /// Aggregate the current in-memory history.
    pub fn stats(&self) -> AbuseStats {
        let now = self.clock.now_ms();
        let state = self.state.lock();

        let mut total_events = 0;
        let mut events_by_type: HashMap<String, u64> = HashMap::new();
        for history in state.event_history.values() {
            total_events += history.len();
            for event in history {
                *events_by_type.entry(event.event_type.clone()).or_insert(0) += 1;
            }
        }

        AbuseStats {
            total_events,
            blocked_count: state
                .blocked
                .values()
                .filter(|&&until| until > now)
                .count(),
            banned_count: state.banned.len(),
            events_by_type,
        }
    }

    /// Full rehabilitation for one identifier: history, cooldown, block,
    /// and ban status are all cleared.
    pub fn reset_protection(&self, identifier: &str) {
        let mut state = self.state.lock();
        state.event_history.remove(identifier);
        state.cooldowns.remove(identifier);
        state.blocked.remove(identifier);
        state.banned.remove(identifier);
        info!(identifier = %identifier, "Abuse protection reset");
    }

    /// Sweep events older than the retention window, dropping identifiers
    /// whose history empties, along with stale cooldowns and expired blocks.
    pub fn cleanup_old_events(&self) {
        let now = self.clock.now_ms();
        let retention = self.config.retention_ms;
        let mut state = self.state.lock();

        let before: usize = state.event_history.values().map(VecDeque::len).sum();
        state.event_history.retain(|_, history| {
            while let Some(event) = history.front() {
                if now.saturating_sub(event.timestamp_ms) > retention {
                    history.pop_front();
                } else {
                    break;
                }
            }
            !history.is_empty()
        });
        let after: usize = state.event_history.values().map(VecDeque::len).sum();

        state
            .cooldowns
            .retain(|_, &mut last| now.saturating_sub(last) <= retention);
        state.blocked.retain(|_, &mut until| until > now);

        if before != after {
            debug!(removed = before - after, "Swept expired abuse events");
        }
    }

    /// Spawn the periodic maintenance task. Idempotent; a no-op after
    /// [`AbuseDetector::destroy`]. The task holds a weak reference so the
    /// detector can still be dropped.
    pub fn spawn_maintenance(self: &Arc<Self>) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self.maintenance.lock();
        if slot.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        let interval_ms = self.config.cleanup_interval_ms.max(1);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(detector) => detector.cleanup_old_events(),
                    None => break,
                }
            }
        });
        *slot = Some(handle);
        debug!(interval_ms, "Abuse detector maintenance task started");
    }

    /// Cancel the maintenance task and clear all state. Idempotent; an
    /// in-flight `record_event` completes, but nothing schedules afterward.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }

        let mut state = self.state.lock();
        state.event_history.clear();
        state.blocked.clear();
        state.banned.clear();
        state.cooldowns.clear();
        info!("Abuse detector destroyed");
    }
}

impl Drop for AbuseDetector {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
    }
}
