//! Rate Governor (C2): per-key request admission with a 60-second
//! sliding window and a per-key cooldown, adapting its own limit and
//! cooldown from observed latency and HTTP status (spec.md §4.2).
//!
//! Grounded on the teacher's `tower-resilience-ratelimiter::limiter`
//! (sliding-window admission state, computed wait durations) and
//! `tower-resilience-core::events` (the listener-collection shape is
//! reused for `adapt` observers). Unlike the teacher's rate limiter —
//! which is a `tower::Layer` protecting one service — this governor is
//! a plain async capability keyed by string (host, API base, ...) that
//! every connector and the fetcher consult directly.

mod budget;
pub mod config;

pub use budget::RateBudget;
pub use config::RateGovernorConfig;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// What `should_throttle` tells the caller: whether to wait, and for
/// how long, before attempting the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleDecision {
    pub should_wait: bool,
    pub wait: Duration,
}

impl ThrottleDecision {
    fn none() -> Self {
        Self {
            should_wait: false,
            wait: Duration::ZERO,
        }
    }

    fn wait_for(wait: Duration) -> Self {
        Self {
            should_wait: true,
            wait,
        }
    }
}

/// The per-key admission controller (spec.md's "Rate Governor").
///
/// All state mutation for a given key is serialized by the single
/// internal mutex (spec.md §4.2 "All state updates are serialized
/// per-key"); since keys are independent, a global lock is sufficient
/// here because sections under the lock are O(window size) and never
/// await.
pub struct RateGovernor {
    config: RateGovernorConfig,
    budgets: Mutex<HashMap<String, RateBudget>>,
}

impl RateGovernor {
    pub fn new(config: RateGovernorConfig) -> Self {
        Self {
            config,
            budgets: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RateGovernorConfig::default())
    }

    /// Returns whether the caller should wait before issuing a request
    /// for `key`, and for how long. Does not mutate admission state —
    /// callers must still call [`RateGovernor::register`] once the
    /// request is actually sent (spec.md §4.4 step 3).
    pub fn should_throttle(&self, key: &str) -> ThrottleDecision {
        let now = Instant::now();
        let mut budgets = self.budgets.lock().unwrap();
        let budget = self.entry(&mut budgets, key);
        budget.prune(now);

        if let Some(last_hit) = budget.last_hit {
            let since_last = now.duration_since(last_hit);
            if since_last < budget.cooldown {
                let wait = budget.cooldown - since_last;
                trace!(key, ?wait, "rate governor: cooldown wait");
                return ThrottleDecision::wait_for(wait);
            }
        }

        if budget.at_capacity() {
            let oldest = budget.oldest().expect("at_capacity implies non-empty hits");
            let until_oldest_expires = budget::WINDOW.saturating_sub(now.duration_since(oldest));
            let wait = until_oldest_expires.max(budget.cooldown);
            trace!(key, ?wait, "rate governor: window wait");
            return ThrottleDecision::wait_for(wait);
        }

        ThrottleDecision::none()
    }

    /// Waits however long `should_throttle` says to, then returns. A
    /// convenience wrapper around the suspension point named in
    /// spec.md §5 item 1.
    pub async fn wait_if_throttled(&self, key: &str) {
        let decision = self.should_throttle(key);
        if decision.should_wait {
            tokio::time::sleep(decision.wait).await;
        }
    }

    /// Records an admitted request, pruning entries older than the
    /// 60-second window.
    pub fn register(&self, key: &str) {
        let now = Instant::now();
        let mut budgets = self.budgets.lock().unwrap();
        let budget = self.entry(&mut budgets, key);
        budget.prune(now);
        budget.register_hit(now);
    }

    /// Adjusts `limit` and `cooldown` for `key` from observed request
    /// latency and HTTP status, per the rules in spec.md §4.2.
    pub fn adapt(&self, key: &str, latency: Duration, status: Option<u16>) {
        let mut budgets = self.budgets.lock().unwrap();
        let budget = self.entry(&mut budgets, key);

        if latency > Duration::from_secs_f64(2.0) {
            budget.limit_per_minute = (budget.limit_per_minute / 2).max(5);
            budget.cooldown = scale_cooldown(budget.cooldown, 1.5, Duration::from_secs_f64(5.0));
        } else if latency < Duration::from_secs_f64(0.5) {
            budget.limit_per_minute = (budget.limit_per_minute + 5).min(120);
            budget.cooldown = scale_cooldown(budget.cooldown, 0.9, Duration::from_secs_f64(0.5))
                .max(Duration::from_secs_f64(0.5));
        }

        match status {
            Some(429) => {
                budget.limit_per_minute = (budget.limit_per_minute / 3).max(3);
                budget.cooldown = scale_cooldown(budget.cooldown, 3.0, Duration::from_secs_f64(10.0));
            }
            Some(s) if s >= 500 => {
                budget.limit_per_minute = (budget.limit_per_minute / 2).max(10);
                budget.cooldown = scale_cooldown(budget.cooldown, 2.0, Duration::from_secs_f64(5.0));
            }
            _ => {}
        }

        debug!(
            key,
            new_limit = budget.limit_per_minute,
            new_cooldown_ms = budget.cooldown.as_millis() as u64,
            "rate governor adapted"
        );
    }

    /// A snapshot of the current budget for a key, for diagnostics.
    pub fn snapshot(&self, key: &str) -> RateBudget {
        let mut budgets = self.budgets.lock().unwrap();
        self.entry(&mut budgets, key).clone()
    }

    fn entry<'a>(
        &self,
        budgets: &'a mut HashMap<String, RateBudget>,
        key: &str,
    ) -> &'a mut RateBudget {
        budgets.entry(key.to_string()).or_insert_with(|| {
            let (limit, cooldown) = self.config.starting_point_for(key);
            RateBudget::new(limit, cooldown)
        })
    }
}

/// Grows or shrinks a cooldown by `factor`, clamped at `bound` — `bound`
/// is a ceiling when `factor > 1.0` (slowing down) and a floor when
/// `factor < 1.0` (speeding back up), matching spec.md §4.2's
/// `min(...)`/`max(...)` pairs.
fn scale_cooldown(current: Duration, factor: f64, bound: Duration) -> Duration {
    let scaled = Duration::from_secs_f64((current.as_secs_f64() * factor).max(0.0));
    if factor >= 1.0 {
        scaled.min(bound)
    } else {
        scaled.max(bound).min(current.max(bound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit_then_throttles() {
        let governor = RateGovernor::new(
            RateGovernorConfig::new()
                .default_limit_per_minute(3)
                .default_cooldown(Duration::ZERO),
        );

        for _ in 0..3 {
            let decision = governor.should_throttle("host");
            assert!(!decision.should_wait);
            governor.register("host");
        }

        let decision = governor.should_throttle("host");
        assert!(decision.should_wait);
        assert!(decision.wait <= budget::WINDOW);
    }

    #[test]
    fn cooldown_forces_wait_between_hits() {
        let governor = RateGovernor::new(
            RateGovernorConfig::new()
                .default_limit_per_minute(1000)
                .default_cooldown(Duration::from_millis(200)),
        );

        governor.register("host");
        let decision = governor.should_throttle("host");
        assert!(decision.should_wait);
        assert!(decision.wait <= Duration::from_millis(200));
    }

    #[test]
    fn adapt_slows_down_on_high_latency() {
        let governor = RateGovernor::new(
            RateGovernorConfig::new()
                .default_limit_per_minute(60)
                .default_cooldown(Duration::from_secs(1)),
        );

        for _ in 0..3 {
            governor.adapt("slow.example.com", Duration::from_secs_f64(3.0), None);
        }

        let snapshot = governor.snapshot("slow.example.com");
        assert!(snapshot.limit_per_minute <= 30);
        assert!(snapshot.cooldown >= Duration::from_secs_f64(1.5));
    }

    #[test]
    fn adapt_speeds_up_on_low_latency() {
        let governor = RateGovernor::new(
            RateGovernorConfig::new()
                .default_limit_per_minute(60)
                .default_cooldown(Duration::from_secs(1)),
        );

        governor.adapt("fast.example.com", Duration::from_millis(100), None);
        let snapshot = governor.snapshot("fast.example.com");
        assert_eq!(snapshot.limit_per_minute, 65);
        assert!(snapshot.cooldown < Duration::from_secs(1));
    }

    #[test]
    fn adapt_reacts_to_429_and_5xx() {
        let governor = RateGovernor::with_defaults();

        governor.adapt("rate-limited.example.com", Duration::from_millis(100), Some(429));
        let snapshot = governor.snapshot("rate-limited.example.com");
        assert!(snapshot.limit_per_minute < 60);

        governor.adapt("flaky.example.com", Duration::from_millis(100), Some(503));
        let snapshot = governor.snapshot("flaky.example.com");
        assert!(snapshot.limit_per_minute < 60);
    }

    #[test]
    fn window_invariant_never_exceeds_limit() {
        let governor = RateGovernor::new(
            RateGovernorConfig::new()
                .default_limit_per_minute(5)
                .default_cooldown(Duration::ZERO),
        );

        for _ in 0..20 {
            let decision = governor.should_throttle("k");
            if !decision.should_wait {
                governor.register("k");
            }
        }

        assert!(governor.snapshot("k").hits_in_window() <= 5);
    }
}
