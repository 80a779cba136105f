//! Pool-wide metrics (spec.md §4.8): submitted/completed/failed/cancelled
//! counts and execution-time aggregates.

use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_execution_time: Duration,
    pub max_execution_time: Duration,
    pub min_execution_time: Option<Duration>,
    pub active_workers: usize,
    pub queue_depth: usize,
}

impl PoolMetrics {
    pub fn record_submitted(&mut self) {
        self.submitted += 1;
    }

    pub fn record_completion(&mut self, elapsed: Duration) {
        self.completed += 1;
        self.total_execution_time += elapsed;
        self.max_execution_time = self.max_execution_time.max(elapsed);
        self.min_execution_time = Some(self.min_execution_time.map_or(elapsed, |m| m.min(elapsed)));
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn record_cancellation(&mut self) {
        self.cancelled += 1;
    }

    pub fn avg_execution_time(&self) -> Duration {
        if self.completed == 0 {
            Duration::ZERO
        } else {
            self.total_execution_time / self.completed as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_execution_time_tracks_completions() {
        let mut metrics = PoolMetrics::default();
        metrics.record_completion(Duration::from_millis(100));
        metrics.record_completion(Duration::from_millis(300));
        assert_eq!(metrics.avg_execution_time(), Duration::from_millis(200));
        assert_eq!(metrics.max_execution_time, Duration::from_millis(300));
        assert_eq!(metrics.min_execution_time, Some(Duration::from_millis(100)));
    }
}
