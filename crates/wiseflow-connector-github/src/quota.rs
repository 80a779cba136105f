//! Provider-enforced rate-limit compliance (spec.md §4.7): track
//! remaining quota from response headers, and when it drops below 5,
//! sleep until `reset + 5s` before the next call.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default)]
struct QuotaState {
    remaining: Option<u32>,
    reset_at: Option<i64>,
}

pub struct QuotaTracker {
    state: Mutex<QuotaState>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QuotaState::default()),
        }
    }

    pub fn observe(&self, headers: &HashMap<String, String>) {
        let remaining = header_u32(headers, "x-ratelimit-remaining");
        let reset_at = header_i64(headers, "x-ratelimit-reset");
        if remaining.is_some() || reset_at.is_some() {
            let mut state = self.state.lock().unwrap();
            if let Some(r) = remaining {
                state.remaining = Some(r);
            }
            if let Some(r) = reset_at {
                state.reset_at = Some(r);
            }
        }
    }

    /// Sleeps until `reset + 5s` if remaining quota is below 5.
    pub async fn wait_if_exhausted(&self) {
        let wait = {
            let state = *self.state.lock().unwrap();
            match (state.remaining, state.reset_at) {
                (Some(remaining), Some(reset_at)) if remaining < 5 => {
                    let now = Utc::now().timestamp();
                    let delta = (reset_at - now + 5).max(0);
                    Some(Duration::from_secs(delta as u64))
                }
                _ => None,
            }
        };

        if let Some(wait) = wait {
            warn!(?wait, "github quota nearly exhausted, waiting for reset");
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for QuotaTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn header_u32(headers: &HashMap<String, String>, name: &str) -> Option<u32> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.parse().ok())
}

fn header_i64(headers: &HashMap<String, String>, name: &str) -> Option<i64> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn does_not_wait_when_quota_is_healthy() {
        let tracker = QuotaTracker::new();
        let mut headers = HashMap::new();
        headers.insert("X-RateLimit-Remaining".to_string(), "100".to_string());
        headers.insert("X-RateLimit-Reset".to_string(), "9999999999".to_string());
        tracker.observe(&headers);

        let start = std::time::Instant::now();
        tracker.wait_if_exhausted().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
