//! Task Monitor (C9): a registry of task lifecycle/progress/history fed
//! by the Event Bus, with rolling metrics and alert callbacks (spec.md
//! §4.9).
//!
//! Grounded on
//! `examples/original_source/core/task/monitor.py`'s `TaskMonitor`
//! (performance metrics dict, alert callback list, resource-usage
//! tracking), reworked from a polling `_monitor_loop` onto
//! `wiseflow_core::events::EventBus` subscription — the engine already
//! has an event bus (C13), so the monitor observes it instead of running
//! its own timer.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
use wiseflow_core::events::{EngineEvent, EventBus, EventSubscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub status: TaskState,
    pub progress: f64,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
    pub execution_time: Option<Duration>,
    pub error: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskRecord {
    fn new(task_id: String) -> Self {
        Self {
            task_id,
            status: TaskState::Pending,
            progress: 0.0,
            started_at: None,
            completed_at: None,
            execution_time: None,
            error: None,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    status: TaskState,
    execution_time: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct RollingMetrics {
    pub avg_execution_time: Duration,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub cancellation_rate: f64,
    pub throughput: f64,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: &'static str,
    pub message: String,
}

pub trait AlertListener: Send + Sync {
    fn on_alert(&self, alert: &Alert);
}

impl<F> AlertListener for F
where
    F: Fn(&Alert) + Send + Sync,
{
    fn on_alert(&self, alert: &Alert) {
        (self)(alert)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub history_size: usize,
    pub failure_rate_threshold: f64,
    pub long_running_multiplier: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            history_size: 100,
            failure_rate_threshold: 0.5,
            long_running_multiplier: 2.0,
        }
    }
}

struct Registry {
    tasks: HashMap<String, TaskRecord>,
    history: VecDeque<HistoryEntry>,
    span_start: Instant,
}

/// The Task Monitor. Subscribe it to an [`EventBus`] with
/// [`TaskMonitor::subscribe_to`] to have it populate itself from
/// lifecycle events published by the worker pool.
pub struct TaskMonitor {
    registry: Mutex<Registry>,
    config: MonitorConfig,
    alert_listeners: Mutex<Vec<Arc<dyn AlertListener>>>,
}

impl TaskMonitor {
    pub fn new(config: MonitorConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry {
                tasks: HashMap::new(),
                history: VecDeque::with_capacity(config.history_size.max(1)),
                span_start: Instant::now(),
            }),
            config,
            alert_listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn add_alert_listener<L: AlertListener + 'static>(&self, listener: L) {
        self.alert_listeners.lock().unwrap().push(Arc::new(listener));
    }

    pub fn subscribe_to(self: &Arc<Self>, bus: &EventBus) {
        bus.subscribe(MonitorSubscriber { monitor: self.clone() });
    }

    pub fn task(&self, task_id: &str) -> Option<TaskRecord> {
        self.registry.lock().unwrap().tasks.get(task_id).cloned()
    }

    pub fn metrics(&self) -> RollingMetrics {
        let registry = self.registry.lock().unwrap();
        rolling_metrics(&registry.history, registry.span_start)
    }

    fn fire_alert(&self, kind: &'static str, message: String) {
        let alert = Alert { kind, message };
        for listener in self.alert_listeners.lock().unwrap().iter() {
            listener.on_alert(&alert);
        }
    }

    fn on_started(&self, task_id: &str) {
        let mut registry = self.registry.lock().unwrap();
        let record = registry
            .tasks
            .entry(task_id.to_string())
            .or_insert_with(|| TaskRecord::new(task_id.to_string()));
        record.status = TaskState::Running;
        record.started_at = Some(Instant::now());
    }

    fn on_progress(&self, task_id: &str, progress: f64) {
        let mut registry = self.registry.lock().unwrap();
        if let Some(record) = registry.tasks.get_mut(task_id) {
            record.progress = progress.clamp(0.0, 1.0);
        }
    }

    fn on_terminal(&self, task_id: &str, status: TaskState, execution_time_ms: Option<u64>, error: Option<String>) {
        let prior_avg = self.metrics().avg_execution_time;

        let execution_time = execution_time_ms.map(Duration::from_millis);
        {
            let mut registry = self.registry.lock().unwrap();
            let record = registry
                .tasks
                .entry(task_id.to_string())
                .or_insert_with(|| TaskRecord::new(task_id.to_string()));
            record.status = status;
            record.progress = 1.0;
            record.completed_at = Some(Instant::now());
            record.execution_time = execution_time;
            record.error = error;

            if registry.history.len() >= self.config.history_size.max(1) {
                registry.history.pop_front();
            }
            registry.history.push_back(HistoryEntry { status, execution_time });
        }

        debug!(task_id, ?status, "task monitor recorded terminal state");

        if let Some(elapsed) = execution_time {
            if !prior_avg.is_zero() && elapsed > prior_avg.mul_f64(self.config.long_running_multiplier) {
                self.fire_alert(
                    "long_running_task",
                    format!("task {task_id} took {elapsed:?}, over {}x rolling average {prior_avg:?}", self.config.long_running_multiplier),
                );
            }
        }

        let metrics = self.metrics();
        if metrics.failure_rate > self.config.failure_rate_threshold {
            self.fire_alert(
                "high_failure_rate",
                format!("rolling failure rate {:.2} exceeds threshold {:.2}", metrics.failure_rate, self.config.failure_rate_threshold),
            );
        }
    }

    fn on_resource_warning(&self, resource: &str, value: f64, threshold: f64) {
        let kind = match resource {
            "cpu" => "high_cpu_usage",
            "memory" => "high_memory_usage",
            "disk" => "high_disk_usage",
            other => {
                debug!(resource = other, "unrecognized resource warning kind");
                "high_resource_usage"
            }
        };
        self.fire_alert(kind, format!("{resource} at {value:.1}%, threshold {threshold:.1}%"));
    }
}

fn rolling_metrics(history: &VecDeque<HistoryEntry>, span_start: Instant) -> RollingMetrics {
    if history.is_empty() {
        return RollingMetrics::default();
    }

    let total = history.len() as f64;
    let completed = history.iter().filter(|e| e.status == TaskState::Completed).count() as f64;
    let failed = history.iter().filter(|e| e.status == TaskState::Failed).count() as f64;
    let cancelled = history.iter().filter(|e| e.status == TaskState::Cancelled).count() as f64;

    let durations: Vec<Duration> = history.iter().filter_map(|e| e.execution_time).collect();
    let avg_execution_time = if durations.is_empty() {
        Duration::ZERO
    } else {
        durations.iter().sum::<Duration>() / durations.len() as u32
    };

    let span = span_start.elapsed().as_secs_f64().max(0.001);

    RollingMetrics {
        avg_execution_time,
        success_rate: completed / total,
        failure_rate: failed / total,
        cancellation_rate: cancelled / total,
        throughput: total / span,
    }
}

struct MonitorSubscriber {
    monitor: Arc<TaskMonitor>,
}

impl EventSubscriber for MonitorSubscriber {
    fn on_event(&self, envelope: &wiseflow_core::events::Envelope) {
        match &envelope.event {
            EngineEvent::TaskStarted { task_id } => self.monitor.on_started(task_id),
            EngineEvent::TaskProgress { task_id, progress } => self.monitor.on_progress(task_id, *progress),
            EngineEvent::TaskCompleted { task_id, execution_time_ms } => {
                self.monitor.on_terminal(task_id, TaskState::Completed, Some(*execution_time_ms), None)
            }
            EngineEvent::TaskFailed { task_id, error } => {
                self.monitor.on_terminal(task_id, TaskState::Failed, None, Some(error.clone()))
            }
            EngineEvent::TaskCancelled { task_id } => self.monitor.on_terminal(task_id, TaskState::Cancelled, None, None),
            EngineEvent::ResourceWarning { resource, value, threshold } => {
                self.monitor.on_resource_warning(resource, *value, *threshold)
            }
            EngineEvent::SystemShutdown { .. } | EngineEvent::ConnectorError { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn lifecycle_events_update_task_record() {
        let monitor = TaskMonitor::new(MonitorConfig::default());
        let bus = EventBus::new();
        monitor.subscribe_to(&bus);

        bus.publish(EngineEvent::TaskStarted { task_id: "t1".into() });
        assert_eq!(monitor.task("t1").unwrap().status, TaskState::Running);

        bus.publish(EngineEvent::TaskCompleted { task_id: "t1".into(), execution_time_ms: 50 });
        let record = monitor.task("t1").unwrap();
        assert_eq!(record.status, TaskState::Completed);
        assert_eq!(record.execution_time, Some(Duration::from_millis(50)));
    }

    #[test]
    fn high_failure_rate_triggers_alert() {
        let monitor = TaskMonitor::new(MonitorConfig {
            failure_rate_threshold: 0.3,
            ..MonitorConfig::default()
        });
        let bus = EventBus::new();
        monitor.subscribe_to(&bus);

        let alerts = Arc::new(AtomicUsize::new(0));
        let alerts2 = alerts.clone();
        monitor.add_alert_listener(move |alert: &Alert| {
            if alert.kind == "high_failure_rate" {
                alerts2.fetch_add(1, Ordering::SeqCst);
            }
        });

        for i in 0..3 {
            let id = format!("t{i}");
            bus.publish(EngineEvent::TaskStarted { task_id: id.clone() });
            bus.publish(EngineEvent::TaskFailed { task_id: id, error: "boom".into() });
        }

        assert!(alerts.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn resource_warning_maps_to_named_alert_kind() {
        let monitor = TaskMonitor::new(MonitorConfig::default());
        let bus = EventBus::new();
        monitor.subscribe_to(&bus);

        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        monitor.add_alert_listener(move |alert: &Alert| {
            *seen2.lock().unwrap() = Some(alert.kind);
        });

        bus.publish(EngineEvent::ResourceWarning { resource: "cpu".into(), value: 95.0, threshold: 80.0 });
        assert_eq!(*seen.lock().unwrap(), Some("high_cpu_usage"));
    }
}
