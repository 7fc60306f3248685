//! Named registry of rate limiters with batch operations.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::{LimiterConfig, NamedLimiterConfig};
use crate::error::{Result, TollgateError};

use super::counter::CheckResult;
use super::limiter::RateLimiter;

struct RegistryEntry {
    name: String,
    limiter: RateLimiter,
}

/// Owns a named collection of [`RateLimiter`] instances sharing an
/// identifier space, preserving registration order for composite checks.
pub struct RateLimiterManager {
    clock: Arc<dyn Clock>,
    limiters: RwLock<Vec<RegistryEntry>>,
}

impl RateLimiterManager {
    /// Create an empty manager with the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty manager against an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            limiters: RwLock::new(Vec::new()),
        }
    }

    /// Build a manager from the configuration surface, registering limiters
    /// in the order they are listed.
    pub fn from_config(configs: &[NamedLimiterConfig]) -> Result<Self> {
        let manager = Self::new();
        for named in configs {
            manager.add_limiter(&named.name, named.limiter())?;
        }
        Ok(manager)
    }

    /// Register a limiter under `name`, replacing any limiter (and its
    /// state) previously registered under the same name.
    pub fn add_limiter(&self, name: &str, config: LimiterConfig) -> Result<()> {
        let limiter = RateLimiter::with_clock(config.clone(), self.clock.clone())?;

        let mut limiters = self.limiters.write();
        match limiters.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => {
                info!(name = %name, "Replacing rate limiter");
                entry.limiter = limiter;
            }
            None => {
                info!(
                    name = %name,
                    algorithm = %config.algorithm,
                    max_requests = config.max_requests,
                    window_ms = config.window_ms,
                    "Registering rate limiter"
                );
                limiters.push(RegistryEntry {
                    name: name.to_string(),
                    limiter,
                });
            }
        }
        Ok(())
    }

    /// Discard the named limiter and all of its state. Returns whether a
    /// limiter was registered under that name.
    pub fn remove_limiter(&self, name: &str) -> bool {
        let mut limiters = self.limiters.write();
        let before = limiters.len();
        limiters.retain(|entry| entry.name != name);
        let removed = limiters.len() < before;
        if removed {
            debug!(name = %name, "Removed rate limiter");
        }
        removed
    }

    /// Check `identifier` against the named limiter.
    pub fn check(&self, name: &str, identifier: &str) -> Result<CheckResult> {
        let limiters = self.limiters.read();
        let entry = limiters
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| TollgateError::LimiterNotFound(name.to_string()))?;
        Ok(entry.limiter.check(identifier))
    }

    /// Check `identifier` against every registered limiter, in registration
    /// order. All limiters are evaluated; nothing short-circuits, so callers
    /// can inspect the full set of results.
    pub fn check_all(&self, identifier: &str) -> Vec<CheckResult> {
        let limiters = self.limiters.read();
        limiters
            .iter()
            .map(|entry| entry.limiter.check(identifier))
            .collect()
    }

    /// Non-mutating snapshot of `identifier`'s status across all registered
    /// limiters. Limiters that have never checked the identifier map to
    /// `None`.
    pub fn status_all(&self, identifier: &str) -> HashMap<String, Option<CheckResult>> {
        let limiters = self.limiters.read();
        limiters
            .iter()
            .map(|entry| (entry.name.clone(), entry.limiter.status(identifier)))
            .collect()
    }

    /// Reset `identifier`'s state in the named limiter.
    pub fn reset(&self, name: &str, identifier: &str) -> Result<()> {
        let limiters = self.limiters.read();
        let entry = limiters
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| TollgateError::LimiterNotFound(name.to_string()))?;
        entry.limiter.reset(identifier);
        Ok(())
    }

    /// Names of all registered limiters, in registration order.
    pub fn limiter_names(&self) -> Vec<String> {
        let limiters = self.limiters.read();
        limiters.iter().map(|entry| entry.name.clone()).collect()
    }

    /// The number of registered limiters.
    pub fn len(&self) -> usize {
        self.limiters.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.limiters.read().is_empty()
    }

    /// Destroy every registered limiter and clear the registry.
    pub fn destroy(&self) {
        let mut limiters = self.limiters.write();
        for entry in limiters.iter() {
            entry.limiter.clear();
        }
        limiters.clear();
        info!("Rate limiter manager destroyed");
    }
}

impl Default for RateLimiterManager {
    fn default() -> Self {
        Self::new()
    }
}
