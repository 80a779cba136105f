//! Per-run statistics and the bounded failed-URL retention map
//! (spec.md §4.6).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct WebStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cached_requests: u64,
    pub domains_accessed: std::collections::HashSet<String>,
    total_processing_time: Duration,
}

impl WebStats {
    pub fn record_success(&mut self, domain: &str, duration: Duration, from_cache: bool) {
        self.total_requests += 1;
        self.successful_requests += 1;
        if from_cache {
            self.cached_requests += 1;
        }
        self.domains_accessed.insert(domain.to_string());
        self.total_processing_time += duration;
    }

    pub fn record_failure(&mut self, domain: &str) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.domains_accessed.insert(domain.to_string());
    }

    pub fn avg_processing_time(&self) -> Duration {
        if self.successful_requests == 0 {
            Duration::ZERO
        } else {
            self.total_processing_time / self.successful_requests as u32
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailedUrl {
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub attempts: u32,
}

/// Bounded map of URL -> failure record, oldest entries evicted once
/// `capacity` is exceeded (spec.md §4.6 "bounded").
pub struct FailedUrlMap {
    capacity: usize,
    entries: HashMap<String, FailedUrl>,
    order: std::collections::VecDeque<String>,
}

impl FailedUrlMap {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: std::collections::VecDeque::new(),
        }
    }

    pub fn record(&mut self, url: &str, error: String) {
        let attempts = self.entries.get(url).map(|f| f.attempts + 1).unwrap_or(1);
        if !self.entries.contains_key(url) {
            self.order.push_back(url.to_string());
            if self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
        }
        self.entries.insert(
            url.to_string(),
            FailedUrl {
                error,
                timestamp: Utc::now(),
                attempts,
            },
        );
    }

    pub fn clear(&mut self, url: &str) {
        self.entries.remove(url);
        self.order.retain(|u| u != url);
    }

    /// URLs whose failure is younger than `max_age` and whose attempts
    /// are below `retry_count` (spec.md §4.6 `retry_failed_urls`).
    pub fn retryable(&self, max_age: Duration, retry_count: u32) -> Vec<String> {
        let now = Utc::now();
        self.entries
            .iter()
            .filter(|(_, failed)| {
                let age = now.signed_duration_since(failed.timestamp);
                age.num_seconds() >= 0
                    && (age.num_milliseconds() as u64) < max_age.as_millis() as u64
                    && failed.attempts < retry_count
            })
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn snapshot(&self) -> HashMap<String, FailedUrl> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_map_evicts_oldest() {
        let mut map = FailedUrlMap::new(2);
        map.record("a", "e1".into());
        map.record("b", "e2".into());
        map.record("c", "e3".into());
        assert_eq!(map.snapshot().len(), 2);
        assert!(!map.snapshot().contains_key("a"));
    }

    #[test]
    fn repeated_failure_increments_attempts() {
        let mut map = FailedUrlMap::new(10);
        map.record("a", "e1".into());
        map.record("a", "e2".into());
        assert_eq!(map.snapshot()["a"].attempts, 2);
    }
}
