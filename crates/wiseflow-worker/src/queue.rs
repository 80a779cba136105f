//! Priority queue ordering: `(priority desc, enqueue-time asc)` (spec.md
//! §4.8). `BinaryHeap` is a max-heap, so `Ord` is defined so the job that
//! should run next compares greatest.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub job_id: Uuid,
    pub priority: Priority,
    pub enqueued_at: Instant,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.job_id == other.job_id
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn higher_priority_pops_first() {
        let mut heap = BinaryHeap::new();
        let now = Instant::now();
        heap.push(QueueEntry { job_id: Uuid::new_v4(), priority: Priority::Low, enqueued_at: now });
        heap.push(QueueEntry { job_id: Uuid::new_v4(), priority: Priority::Critical, enqueued_at: now });
        heap.push(QueueEntry { job_id: Uuid::new_v4(), priority: Priority::Normal, enqueued_at: now });

        assert_eq!(heap.pop().unwrap().priority, Priority::Critical);
        assert_eq!(heap.pop().unwrap().priority, Priority::Normal);
        assert_eq!(heap.pop().unwrap().priority, Priority::Low);
    }

    #[test]
    fn same_priority_is_fifo_by_enqueue_time() {
        let mut heap = BinaryHeap::new();
        let t0 = Instant::now();
        let t1 = t0 + std::time::Duration::from_millis(10);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        heap.push(QueueEntry { job_id: second, priority: Priority::Normal, enqueued_at: t1 });
        heap.push(QueueEntry { job_id: first, priority: Priority::Normal, enqueued_at: t0 });

        assert_eq!(heap.pop().unwrap().job_id, first);
        assert_eq!(heap.pop().unwrap().job_id, second);
    }
}
