//! Auto-Shutdown Supervisor (C12): idle, resource-pressure, and
//! completion predicates, plus the graceful-exit sequence and signal
//! routing that follow a trigger (spec.md §4.12).
//!
//! Grounded on `examples/original_source/core/task/auto_shutdown.py`'s
//! `AutoShutdownManager` — its three `_check_*` predicates and
//! `_delayed_shutdown`'s wait-then-exit sequence — reworked so the
//! "exit" step is a caller-observed trigger rather than `os._exit`:
//! library code here never terminates the process, it publishes
//! [`wiseflow_core::events::EngineEvent::SystemShutdown`] and resolves
//! [`ShutdownSupervisor::wait_for_trigger`], leaving the actual process
//! exit to the binary composing the engine (C14).

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};
use wiseflow_core::error::EngineResult;
use wiseflow_core::events::{EngineEvent, EventBus};
use wiseflow_core::resource::{Resource, ResourceProbe};

/// What C12's completion predicate needs from whatever tracks
/// `auto_shutdown`-flagged work (spec.md §3 `MiningTask.auto_shutdown`).
/// Kept as a narrow capability trait, the way `Store`/`HTMLFetcher` are
/// defined in `wiseflow_core::collaborators`, so this crate never
/// depends on `wiseflow-mining` directly.
#[async_trait]
pub trait CompletionSource: Send + Sync {
    async fn completion_status(&self) -> EngineResult<CompletionStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionStatus {
    pub has_auto_shutdown_tasks: bool,
    pub all_terminal: bool,
}

/// Why a shutdown was triggered.
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    Idle { idle_for: Duration, threshold: Duration },
    ResourcePressure { resource: Resource, value: f64, threshold: f64 },
    Completion,
    Signal(&'static str),
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Idle { idle_for, threshold } => {
                write!(f, "idle timeout exceeded ({idle_for:?} > {threshold:?})")
            }
            ShutdownReason::ResourcePressure { resource, value, threshold } => {
                write!(f, "{} usage exceeded threshold ({value:.1}% > {threshold:.1}%)", resource.as_str())
            }
            ShutdownReason::Completion => write!(f, "all auto-shutdown tasks completed"),
            ShutdownReason::Signal(name) => write!(f, "signal received ({name})"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResourcePressureConfig {
    pub enabled: bool,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
}

impl Default for ResourcePressureConfig {
    fn default() -> Self {
        Self { enabled: true, cpu_pct: 90.0, mem_pct: 85.0, disk_pct: 90.0 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionConfig {
    pub enabled: bool,
    pub wait: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self { enabled: true, wait: Duration::from_secs(300) }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GracefulShutdownConfig {
    pub enabled: bool,
    pub timeout: Duration,
}

impl Default for GracefulShutdownConfig {
    fn default() -> Self {
        Self { enabled: true, timeout: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ShutdownConfig {
    pub enabled: bool,
    pub idle_timeout: Duration,
    pub check_interval: Duration,
    pub resource: ResourcePressureConfig,
    pub completion: CompletionConfig,
    pub graceful_shutdown: GracefulShutdownConfig,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_timeout: Duration::from_secs(3600),
            check_interval: Duration::from_secs(300),
            resource: ResourcePressureConfig::default(),
            completion: CompletionConfig::default(),
            graceful_shutdown: GracefulShutdownConfig::default(),
        }
    }
}

struct State {
    last_activity: Instant,
    reason: Option<ShutdownReason>,
}

/// The supervisor. Cheap to clone (wraps an `Arc` internally); hold one
/// instance across the process and share it with whatever records
/// activity (e.g. the worker pool's job-submission path).
#[derive(Clone)]
pub struct ShutdownSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: ShutdownConfig,
    probe: Option<ResourceProbe>,
    completion: Option<Arc<dyn CompletionSource>>,
    bus: Option<EventBus>,
    state: Mutex<State>,
    triggered: Notify,
    stop: Notify,
    stopped: AtomicBool,
}

impl ShutdownSupervisor {
    pub fn new(
        config: ShutdownConfig,
        probe: Option<ResourceProbe>,
        completion: Option<Arc<dyn CompletionSource>>,
        bus: Option<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                probe,
                completion,
                bus,
                state: Mutex::new(State { last_activity: Instant::now(), reason: None }),
                triggered: Notify::new(),
                stop: Notify::new(),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.inner.bus {
            bus.publish(event);
        }
    }

    /// Resets the idle clock. Call this from whatever submits work
    /// (mirrors `AutoShutdownManager.update_activity`).
    pub async fn record_activity(&self) {
        self.inner.state.lock().await.last_activity = Instant::now();
    }

    /// Starts the periodic predicate check and the OS signal routing.
    /// Both run as background tasks; this call returns immediately.
    pub fn start(&self) {
        if !self.inner.config.enabled {
            info!("auto-shutdown supervisor disabled");
            return;
        }
        self.spawn_monitor_loop();
        self.spawn_signal_loop();
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.stop.notify_waiters();
    }

    /// Resolves with the reason once a shutdown has been triggered, by
    /// any predicate or by a signal. Call sites that own the actual
    /// process-exit decision should await this, run their own cleanup,
    /// then exit.
    pub async fn wait_for_trigger(&self) -> ShutdownReason {
        loop {
            if let Some(reason) = self.inner.state.lock().await.reason.clone() {
                return reason;
            }
            self.inner.triggered.notified().await;
        }
    }

    pub async fn triggered_reason(&self) -> Option<ShutdownReason> {
        self.inner.state.lock().await.reason.clone()
    }

    /// Idempotent: the first caller's reason wins, later ones are
    /// ignored (mirrors `request_shutdown`'s `shutdown_requested` guard).
    async fn request_shutdown(&self, reason: ShutdownReason) {
        let mut state = self.inner.state.lock().await;
        if state.reason.is_some() {
            return;
        }
        info!(%reason, "shutdown requested");
        state.reason = Some(reason.clone());
        drop(state);
        self.publish(EngineEvent::SystemShutdown { reason: reason.to_string() });
        self.inner.triggered.notify_waiters();
    }

    /// Sleeps `graceful_shutdown.timeout`, honoring `stop()` so tests
    /// and a supervised restart can cut the wait short. Callers run
    /// their own component shutdown after this returns.
    pub async fn await_graceful_window(&self) {
        if !self.inner.config.graceful_shutdown.enabled {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.inner.config.graceful_shutdown.timeout) => {}
            _ = self.inner.stop.notified() => {}
        }
    }

    fn spawn_monitor_loop(&self) {
        let supervisor = self.clone();
        let interval = self.inner.config.check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if supervisor.inner.stopped.load(Ordering::SeqCst) {
                            break;
                        }
                        if supervisor.triggered_reason().await.is_some() {
                            break;
                        }
                        supervisor.check_once().await;
                    }
                    _ = supervisor.inner.stop.notified() => break,
                }
            }
        });
    }

    async fn check_once(&self) {
        if let Some(reason) = self.check_idle().await {
            self.request_shutdown(reason).await;
            return;
        }
        if let Some(reason) = self.check_resource_pressure() {
            self.request_shutdown(reason).await;
            return;
        }
        self.check_completion().await;
    }

    async fn check_idle(&self) -> Option<ShutdownReason> {
        let idle_for = self.inner.state.lock().await.last_activity.elapsed();
        if idle_for > self.inner.config.idle_timeout {
            Some(ShutdownReason::Idle { idle_for, threshold: self.inner.config.idle_timeout })
        } else {
            None
        }
    }

    fn check_resource_pressure(&self) -> Option<ShutdownReason> {
        if !self.inner.config.resource.enabled {
            return None;
        }
        let probe = self.inner.probe.as_ref()?;
        let sample = probe.latest()?;
        let checks = [
            (Resource::Cpu, sample.cpu_pct, self.inner.config.resource.cpu_pct),
            (Resource::Memory, sample.mem_pct, self.inner.config.resource.mem_pct),
            (Resource::Disk, sample.disk_pct, self.inner.config.resource.disk_pct),
        ];
        for (resource, value, threshold) in checks {
            if value > threshold {
                warn!(resource = resource.as_str(), value, threshold, "resource pressure triggering shutdown");
                return Some(ShutdownReason::ResourcePressure { resource, value, threshold });
            }
        }
        None
    }

    /// Mirrors `_check_task_completion`: detect all-terminal, wait
    /// `completion.wait`, then re-check before committing to a trigger
    /// (so a task queued in the meantime cancels the shutdown).
    async fn check_completion(&self) {
        if !self.inner.config.completion.enabled {
            return;
        }
        let Some(source) = &self.inner.completion else { return };
        let Ok(status) = source.completion_status().await else { return };
        if !status.has_auto_shutdown_tasks || !status.all_terminal {
            return;
        }

        info!(wait = ?self.inner.config.completion.wait, "all auto-shutdown tasks complete, waiting before shutdown");
        tokio::select! {
            _ = tokio::time::sleep(self.inner.config.completion.wait) => {}
            _ = self.inner.stop.notified() => return,
        }

        if let Ok(status) = source.completion_status().await {
            if status.has_auto_shutdown_tasks && status.all_terminal {
                self.request_shutdown(ShutdownReason::Completion).await;
            }
        }
    }

    fn spawn_signal_loop(&self) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut terminate = match signal(SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(err) => {
                        warn!(%err, "failed to install SIGTERM handler");
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        supervisor.request_shutdown(ShutdownReason::Signal("SIGINT")).await;
                    }
                    _ = terminate.recv() => {
                        supervisor.request_shutdown(ShutdownReason::Signal("SIGTERM")).await;
                    }
                    _ = supervisor.inner.stop.notified() => {}
                }
            }
            #[cfg(not(unix))]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        supervisor.request_shutdown(ShutdownReason::Signal("CTRL_C")).await;
                    }
                    _ = supervisor.inner.stop.notified() => {}
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCompletion(CompletionStatus);

    #[async_trait]
    impl CompletionSource for FixedCompletion {
        async fn completion_status(&self) -> EngineResult<CompletionStatus> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn idle_timeout_triggers_shutdown() {
        let config = ShutdownConfig {
            idle_timeout: Duration::from_millis(10),
            check_interval: Duration::from_millis(5),
            resource: ResourcePressureConfig { enabled: false, ..Default::default() },
            completion: CompletionConfig { enabled: false, ..Default::default() },
            ..Default::default()
        };
        let supervisor = ShutdownSupervisor::new(config, None, None, None);
        supervisor.start();

        let reason = tokio::time::timeout(Duration::from_secs(2), supervisor.wait_for_trigger())
            .await
            .expect("shutdown should trigger");
        assert!(matches!(reason, ShutdownReason::Idle { .. }));
        supervisor.stop();
    }

    #[tokio::test]
    async fn activity_resets_idle_clock() {
        let config = ShutdownConfig {
            idle_timeout: Duration::from_millis(50),
            check_interval: Duration::from_millis(10),
            resource: ResourcePressureConfig { enabled: false, ..Default::default() },
            completion: CompletionConfig { enabled: false, ..Default::default() },
            ..Default::default()
        };
        let supervisor = ShutdownSupervisor::new(config, None, None, None);
        supervisor.start();

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            supervisor.record_activity().await;
        }
        assert!(supervisor.triggered_reason().await.is_none());
        supervisor.stop();
    }

    #[tokio::test]
    async fn completion_predicate_waits_then_triggers() {
        let config = ShutdownConfig {
            idle_timeout: Duration::from_secs(3600),
            check_interval: Duration::from_millis(5),
            resource: ResourcePressureConfig { enabled: false, ..Default::default() },
            completion: CompletionConfig { enabled: true, wait: Duration::from_millis(20) },
            ..Default::default()
        };
        let completion = Arc::new(FixedCompletion(CompletionStatus { has_auto_shutdown_tasks: true, all_terminal: true }));
        let supervisor = ShutdownSupervisor::new(config, None, Some(completion), None);
        supervisor.start();

        let reason = tokio::time::timeout(Duration::from_secs(2), supervisor.wait_for_trigger())
            .await
            .expect("completion should trigger shutdown");
        assert!(matches!(reason, ShutdownReason::Completion));
        supervisor.stop();
    }

    #[tokio::test]
    async fn no_auto_shutdown_tasks_never_triggers_completion() {
        let config = ShutdownConfig {
            idle_timeout: Duration::from_secs(3600),
            check_interval: Duration::from_millis(5),
            resource: ResourcePressureConfig { enabled: false, ..Default::default() },
            completion: CompletionConfig { enabled: true, wait: Duration::from_millis(5) },
            ..Default::default()
        };
        let completion = Arc::new(FixedCompletion(CompletionStatus { has_auto_shutdown_tasks: false, all_terminal: true }));
        let supervisor = ShutdownSupervisor::new(config, None, Some(completion), None);
        supervisor.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(supervisor.triggered_reason().await.is_none());
        supervisor.stop();
    }

    #[tokio::test]
    async fn request_shutdown_is_idempotent() {
        let supervisor = ShutdownSupervisor::new(ShutdownConfig::default(), None, None, None);
        supervisor.request_shutdown(ShutdownReason::Completion).await;
        supervisor.request_shutdown(ShutdownReason::Signal("SIGINT")).await;
        assert!(matches!(supervisor.triggered_reason().await, Some(ShutdownReason::Completion)));
    }
}
