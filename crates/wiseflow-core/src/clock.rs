//! Monotonic time, shared so every component measures against the same
//! clock (and so tests can reason about `Instant` deltas directly; there
//! is deliberately no fake-clock injection point here, mirroring the
//! teacher's use of bare `std::time::Instant` throughout
//! `tower-resilience-ratelimiter::limiter`).

use std::time::Instant;

/// Returns the current monotonic instant. A thin named wrapper rather
/// than calling `Instant::now()` everywhere keeps call sites readable
/// and gives this crate one place to change if a fake clock is ever
/// needed.
pub fn now() -> Instant {
    Instant::now()
}
