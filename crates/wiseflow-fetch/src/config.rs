//! Fetch policy (spec.md §6 `fetch.timeout_s`, `fetch.max_retries`,
//! `fetch.retry_delay_s`).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_delay: Duration,
    /// Per-connector concurrency semaphore size (spec.md §5, default
    /// 3-5 in-flight calls).
    pub concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            concurrency: 4,
        }
    }
}
