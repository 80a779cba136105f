//! Per-key rate budget state (spec.md §3 `RateBudget`).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub(crate) const WINDOW: Duration = Duration::from_secs(60);

/// The sliding-window admission state for one key (a host, an API base,
/// whatever the caller chooses as its throttling granularity).
#[derive(Debug, Clone)]
pub struct RateBudget {
    pub limit_per_minute: usize,
    pub cooldown: Duration,
    pub(crate) hits: VecDeque<Instant>,
    pub(crate) last_hit: Option<Instant>,
}

impl RateBudget {
    pub fn new(limit_per_minute: usize, cooldown: Duration) -> Self {
        Self {
            limit_per_minute: limit_per_minute.max(1),
            cooldown,
            hits: VecDeque::new(),
            last_hit: None,
        }
    }

    /// Drops admission timestamps older than the 60-second window.
    /// Invariant (spec.md §3): after pruning, `|hits| <= limit_per_minute`
    /// must hold before admitting a new hit — pruning alone does not
    /// guarantee this when the limit itself just shrank via `adapt`, so
    /// callers always prune immediately before checking capacity.
    pub(crate) fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.duration_since(oldest) >= WINDOW {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    pub(crate) fn oldest(&self) -> Option<Instant> {
        self.hits.front().copied()
    }

    pub(crate) fn at_capacity(&self) -> bool {
        self.hits.len() >= self.limit_per_minute
    }

    pub(crate) fn register_hit(&mut self, now: Instant) {
        self.hits.push_back(now);
        self.last_hit = Some(now);
    }

    pub fn hits_in_window(&self) -> usize {
        self.hits.len()
    }
}
