//! Builder for [`crate::RateGovernor`] defaults and per-key overrides.

use std::collections::HashMap;
use std::time::Duration;

/// Starting parameters for a key that has not been seen before, plus
/// per-key overrides (spec.md §6 `ratelimit.default_per_minute`,
/// `ratelimit.default_cooldown_s`, `ratelimit.per_domain`).
#[derive(Debug, Clone)]
pub struct RateGovernorConfig {
    pub default_limit_per_minute: usize,
    pub default_cooldown: Duration,
    pub overrides: HashMap<String, (usize, Duration)>,
}

impl Default for RateGovernorConfig {
    fn default() -> Self {
        Self {
            default_limit_per_minute: 60,
            default_cooldown: Duration::from_secs(1),
            overrides: HashMap::new(),
        }
    }
}

impl RateGovernorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_limit_per_minute(mut self, limit: usize) -> Self {
        self.default_limit_per_minute = limit;
        self
    }

    pub fn default_cooldown(mut self, cooldown: Duration) -> Self {
        self.default_cooldown = cooldown;
        self
    }

    pub fn per_key_override(
        mut self,
        key: impl Into<String>,
        limit: usize,
        cooldown: Duration,
    ) -> Self {
        self.overrides.insert(key.into(), (limit, cooldown));
        self
    }

    pub(crate) fn starting_point_for(&self, key: &str) -> (usize, Duration) {
        self.overrides
            .get(key)
            .copied()
            .unwrap_or((self.default_limit_per_minute, self.default_cooldown))
    }
}
