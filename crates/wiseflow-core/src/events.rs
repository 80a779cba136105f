//! Event Bus (C13): fire-and-forget publish of lifecycle, resource, and
//! shutdown events.
//!
//! Generalizes the teacher's per-pattern `ResilienceEvent` /
//! `EventListeners<E>` pair (`tower-resilience-core::events`) into a
//! single bus with one closed event enum, since the engine — unlike a
//! tower middleware stack — has one shared timeline of lifecycle events
//! rather than one event type per layer.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::warn;

/// One of the event kinds named in spec.md §4.13.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    TaskStarted { task_id: String },
    TaskProgress { task_id: String, progress: f64 },
    TaskCompleted { task_id: String, execution_time_ms: u64 },
    TaskFailed { task_id: String, error: String },
    TaskCancelled { task_id: String },
    ResourceWarning { resource: String, value: f64, threshold: f64 },
    SystemShutdown { reason: String },
    ConnectorError { connector: String, error: String },
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::TaskStarted { .. } => "task_started",
            EngineEvent::TaskProgress { .. } => "task_progress",
            EngineEvent::TaskCompleted { .. } => "task_completed",
            EngineEvent::TaskFailed { .. } => "task_failed",
            EngineEvent::TaskCancelled { .. } => "task_cancelled",
            EngineEvent::ResourceWarning { .. } => "resource_warning",
            EngineEvent::SystemShutdown { .. } => "system_shutdown",
            EngineEvent::ConnectorError { .. } => "connector_error",
        }
    }
}

/// An envelope pairing an event with the instant it was published, so
/// subscribers that log or persist events have a stable ordering key
/// within one event type (spec.md §5 explicitly does not promise
/// ordering *across* event types).
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: EngineEvent,
    pub at: Instant,
}

/// A subscriber to the event bus. Implementations must not block —
/// publishing is fire-and-forget and a slow subscriber would otherwise
/// stall every publisher.
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, envelope: &Envelope);
}

impl<F> EventSubscriber for F
where
    F: Fn(&Envelope) + Send + Sync,
{
    fn on_event(&self, envelope: &Envelope) {
        (self)(envelope)
    }
}

/// The bus itself. Cheap to clone; every component that needs to
/// publish or subscribe holds a clone of the same instance.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Arc<dyn EventSubscriber>>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.read().unwrap().len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<S: EventSubscriber + 'static>(&self, subscriber: S) {
        self.subscribers.write().unwrap().push(Arc::new(subscriber));
    }

    /// Publishes an event to every subscriber. Never blocks the
    /// publisher on a subscriber's work, and a subscriber that panics
    /// never propagates the panic back here — the remaining subscribers
    /// still run (mirrors `EventListeners::emit`'s `catch_unwind`).
    pub fn publish(&self, event: EngineEvent) {
        let envelope = Envelope {
            event,
            at: Instant::now(),
        };
        let subscribers = self.subscribers.read().unwrap().clone();
        for (index, subscriber) in subscribers.iter().enumerate() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber.on_event(&envelope);
            }));
            if result.is_err() {
                warn!(subscriber_index = index, event = envelope.event.event_type(), "event subscriber panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            bus.subscribe(move |_: &Envelope| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.publish(EngineEvent::TaskStarted { task_id: "t1".into() });
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_: &Envelope| panic!("boom"));
        let reached2 = reached.clone();
        bus.subscribe(move |_: &Envelope| {
            reached2.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(EngineEvent::SystemShutdown { reason: "idle".into() });
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }
}
