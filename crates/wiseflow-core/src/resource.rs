//! Clock & Resource Probe (C1): CPU/mem/disk/IO sampling with bounded
//! history and threshold callbacks, sampled on its own cadence so it
//! never competes with the worker pool for scheduling latency.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sysinfo::{Disks, System};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One resource dimension a threshold callback can fire for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Cpu,
    Memory,
    Disk,
    Io,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
            Resource::Disk => "disk",
            Resource::Io => "io",
        }
    }
}

/// One point-in-time reading. All percentages are `0.0..=100.0`-ish
/// (IO can exceed 100 if throughput exceeds the 100 MB/s reference).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
    pub io_pct: f64,
    pub at: Instant,
}

impl ResourceSample {
    pub fn value_for(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu_pct,
            Resource::Memory => self.mem_pct,
            Resource::Disk => self.disk_pct,
            Resource::Io => self.io_pct,
        }
    }
}

/// Percent-thresholds per resource dimension, used to fire
/// `on_threshold_exceeded` callbacks (spec.md §4.1) and consumed
/// directly by C12's resource-pressure predicate.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
    pub io_pct: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_pct: 80.0,
            mem_pct: 80.0,
            disk_pct: 80.0,
            io_pct: 80.0,
        }
    }
}

/// A callback invoked once per sample that exceeds its resource's
/// threshold. Mirrors the teacher's `EventListener` shape
/// (`tower-resilience-core::events`) but is kept as its own trait
/// since resource callbacks are a narrower, synchronous contract.
pub trait ThresholdListener: Send + Sync {
    fn on_threshold_exceeded(&self, resource: Resource, sample: ResourceSample);
}

impl<F> ThresholdListener for F
where
    F: Fn(Resource, ResourceSample) + Send + Sync,
{
    fn on_threshold_exceeded(&self, resource: Resource, sample: ResourceSample) {
        (self)(resource, sample)
    }
}

const IO_REFERENCE_BYTES_PER_SEC: f64 = 100.0 * 1024.0 * 1024.0;

struct Inner {
    system: System,
    disks: Disks,
    history: VecDeque<ResourceSample>,
    history_cap: usize,
    thresholds: Thresholds,
    listeners: Vec<Arc<dyn ThresholdListener>>,
    last_io_bytes: u64,
    last_io_at: Instant,
}

/// The Clock & Resource Probe. Cheap to clone (it's an `Arc` handle);
/// share one instance across the worker pool, the monitor, and the
/// auto-shutdown supervisor.
#[derive(Clone)]
pub struct ResourceProbe {
    inner: Arc<Mutex<Inner>>,
}

impl ResourceProbe {
    /// `history_size` defaults to 60 per spec.md §4.1.
    pub fn new(thresholds: Thresholds, history_size: usize) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        let disks = Disks::new_with_refreshed_list();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                system,
                disks,
                history: VecDeque::with_capacity(history_size.max(1)),
                history_cap: history_size.max(1),
                thresholds,
                listeners: Vec::new(),
                last_io_bytes: 0,
                last_io_at: Instant::now(),
            })),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Thresholds::default(), 60)
    }

    pub fn add_listener<L: ThresholdListener + 'static>(&self, listener: L) {
        self.inner.lock().unwrap().listeners.push(Arc::new(listener));
    }

    /// Takes one reading, appends it to the bounded history, and fires
    /// any threshold callbacks whose resource is over limit.
    pub fn sample(&self) -> ResourceSample {
        let mut inner = self.inner.lock().unwrap();

        inner.system.refresh_cpu_usage();
        inner.system.refresh_memory();
        inner.disks.refresh(true);

        let cpu_pct = inner.system.global_cpu_usage() as f64;
        let mem_pct = if inner.system.total_memory() > 0 {
            (inner.system.used_memory() as f64 / inner.system.total_memory() as f64) * 100.0
        } else {
            0.0
        };
        let disk_pct = disk_usage_pct(&inner.disks);

        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_io_at).as_secs_f64().max(0.001);
        let io_bytes: u64 = inner
            .disks
            .list()
            .iter()
            .map(|d| d.usage().total_read_bytes + d.usage().total_written_bytes)
            .sum();
        let delta_bytes = io_bytes.saturating_sub(inner.last_io_bytes) as f64;
        let io_pct = (delta_bytes / elapsed / IO_REFERENCE_BYTES_PER_SEC) * 100.0;
        inner.last_io_bytes = io_bytes;
        inner.last_io_at = now;

        let sample = ResourceSample {
            cpu_pct,
            mem_pct,
            disk_pct,
            io_pct,
            at: now,
        };

        if inner.history.len() == inner.history_cap {
            inner.history.pop_front();
        }
        inner.history.push_back(sample);

        let thresholds = inner.thresholds;
        let listeners = inner.listeners.clone();
        drop(inner);

        for (resource, limit) in [
            (Resource::Cpu, thresholds.cpu_pct),
            (Resource::Memory, thresholds.mem_pct),
            (Resource::Disk, thresholds.disk_pct),
            (Resource::Io, thresholds.io_pct),
        ] {
            if sample.value_for(resource) > limit {
                for listener in &listeners {
                    listener.on_threshold_exceeded(resource, sample);
                }
            }
        }

        sample
    }

    pub fn history(&self) -> Vec<ResourceSample> {
        self.inner.lock().unwrap().history.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<ResourceSample> {
        self.inner.lock().unwrap().history.back().copied()
    }

    /// Suggests a worker-pool size given `min`/`max` clamps, based on
    /// current CPU pressure (spec.md §4.8's dynamic sizing input). High
    /// CPU pressure pulls the suggestion down toward `min`; idle CPU
    /// pulls it toward `max`.
    pub fn optimal_worker_count(&self, min: usize, max: usize) -> usize {
        let min = min.max(1);
        let max = max.max(min);
        let cpu_pct = self.latest().map(|s| s.cpu_pct).unwrap_or(0.0);
        let headroom = (100.0 - cpu_pct).clamp(0.0, 100.0) / 100.0;
        let suggested = min as f64 + headroom * (max - min) as f64;
        (suggested.round() as usize).clamp(min, max)
    }

    /// Starts the fixed-cadence sampling loop on the current Tokio
    /// runtime. Returns a handle the caller can abort on shutdown.
    pub fn spawn_sampling_loop(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let sample = self.sample();
                debug!(
                    cpu = sample.cpu_pct,
                    mem = sample.mem_pct,
                    disk = sample.disk_pct,
                    io = sample.io_pct,
                    "resource sample"
                );
            }
        })
    }
}

fn disk_usage_pct(disks: &Disks) -> f64 {
    let (total, available): (u64, u64) = disks
        .list()
        .iter()
        .fold((0, 0), |(t, a), d| (t + d.total_space(), a + d.available_space()));
    if total == 0 {
        warn!("no disks reported by sysinfo; disk pressure unavailable");
        return 0.0;
    }
    let used = total.saturating_sub(available);
    (used as f64 / total as f64) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded() {
        let probe = ResourceProbe::new(Thresholds::default(), 3);
        for _ in 0..10 {
            probe.sample();
        }
        assert_eq!(probe.history().len(), 3);
    }

    #[test]
    fn optimal_worker_count_respects_clamp() {
        let probe = ResourceProbe::with_defaults();
        let n = probe.optimal_worker_count(2, 8);
        assert!((2..=8).contains(&n));
    }

    #[test]
    fn threshold_listener_fires() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let probe = ResourceProbe::new(
            Thresholds {
                cpu_pct: -1.0,
                mem_pct: 1000.0,
                disk_pct: 1000.0,
                io_pct: 1000.0,
            },
            10,
        );
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        probe.add_listener(move |resource: Resource, _sample: ResourceSample| {
            if resource == Resource::Cpu {
                fired2.store(true, Ordering::SeqCst);
            }
        });
        probe.sample();
        assert!(fired.load(Ordering::SeqCst));
    }
}
