//! Top-level wiring for the wiseflow ingestion engine: loads
//! [`config::EngineConfig`], constructs the worker pool (C8), task
//! monitor (C9), legacy task manager (C10), data-mining manager (C11),
//! event bus (C13) and auto-shutdown supervisor (C12), and exposes them
//! behind the [`facade::UnifiedTaskManager`] (C14).
//!
//! Grounded on `examples/original_source/core/task/unified_manager.py`'s
//! module-level singleton construction (`task_manager = TaskManager()`,
//! `thread_pool_manager = ThreadPoolManager()`, ...), reworked into an
//! explicit `Engine::bootstrap` that returns owned handles rather than
//! module globals, since nothing in this workspace reaches for
//! `lazy_static`/`once_cell` the way the original reaches for module
//! import side effects.

pub mod completion;
pub mod config;
pub mod facade;

use std::path::Path;
use std::sync::Arc;
use wiseflow_core::collaborators::{MemoryStore, Store};
use wiseflow_core::error::EngineResult;
use wiseflow_core::events::EventBus;
use wiseflow_core::resource::ResourceProbe;
use wiseflow_connector::ConnectorRegistry;

pub use completion::MiningCompletionSource;
pub use config::EngineConfig;
pub use facade::{TaskStatus, UnifiedTaskManager};

/// Every long-lived component the engine composes, wired together per
/// one [`EngineConfig`]. Each field stays independently reachable
/// (e.g. a binary entry point registering connectors on
/// `connectors` before the first `mining.create_task` call).
pub struct Engine {
    pub config: EngineConfig,
    pub bus: EventBus,
    pub resource_probe: ResourceProbe,
    pub connectors: Arc<ConnectorRegistry>,
    pub store: Arc<dyn Store>,
    pub monitor: Arc<wiseflow_monitor::TaskMonitor>,
    pub tasks: wiseflow_tasks::TaskManager,
    pub mining: Arc<wiseflow_mining::MiningManager>,
    pub shutdown: wiseflow_shutdown::ShutdownSupervisor,
    pub unified_tasks: UnifiedTaskManager,
}

impl Engine {
    /// Reads configuration from `config_path` (falling back to defaults
    /// if absent) and constructs every component against it. Does not
    /// start any background loops; call [`Engine::start`] once
    /// connectors are registered.
    pub fn bootstrap(config_path: &Path) -> EngineResult<Self> {
        let config = EngineConfig::load(config_path)?;
        Self::bootstrap_with_config(config)
    }

    pub fn bootstrap_with_config(config: EngineConfig) -> EngineResult<Self> {
        let bus = EventBus::new();
        let resource_probe = ResourceProbe::with_defaults();
        let connectors = Arc::new(ConnectorRegistry::new());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

        let monitor = wiseflow_monitor::TaskMonitor::new(wiseflow_monitor::MonitorConfig {
            history_size: config.monitor.history_size,
            failure_rate_threshold: config.monitor.failure_rate_threshold,
            long_running_multiplier: config.monitor.long_running_multiplier,
        });
        monitor.subscribe_to(&bus);

        let pool_config = wiseflow_worker::WorkerPoolConfig {
            min_workers: config.worker.min_workers,
            max_workers: config.worker.max_workers,
            adjust_interval: std::time::Duration::from_secs(config.worker.adjust_interval_secs),
        };
        let pool = wiseflow_worker::WorkerPool::new(pool_config, Some(resource_probe.clone()), Some(bus.clone()));

        let tasks = wiseflow_tasks::TaskManager::new(pool.clone(), config.history_limit);

        let mining = Arc::new(wiseflow_mining::MiningManager::new(
            store.clone(),
            connectors.clone(),
            Some(bus.clone()),
        ));

        let completion: Arc<dyn wiseflow_shutdown::CompletionSource> =
            Arc::new(MiningCompletionSource::new(mining.clone()));
        let shutdown_config = wiseflow_shutdown::ShutdownConfig {
            enabled: config.shutdown.enabled,
            idle_timeout: std::time::Duration::from_secs(config.shutdown.idle_timeout_secs),
            check_interval: std::time::Duration::from_secs(config.shutdown.check_interval_secs),
            resource: wiseflow_shutdown::ResourcePressureConfig {
                enabled: config.shutdown.resource_pressure_enabled,
                cpu_pct: config.shutdown.cpu_pct,
                mem_pct: config.shutdown.mem_pct,
                disk_pct: config.shutdown.disk_pct,
            },
            completion: wiseflow_shutdown::CompletionConfig {
                enabled: config.shutdown.completion_enabled,
                wait: std::time::Duration::from_secs(config.shutdown.completion_wait_secs),
            },
            graceful_shutdown: wiseflow_shutdown::GracefulShutdownConfig {
                enabled: config.shutdown.graceful_shutdown_enabled,
                timeout: std::time::Duration::from_secs(config.shutdown.graceful_shutdown_timeout_secs),
            },
        };
        let shutdown = wiseflow_shutdown::ShutdownSupervisor::new(
            shutdown_config,
            Some(resource_probe.clone()),
            Some(completion),
            Some(bus.clone()),
        );

        let unified_tasks = UnifiedTaskManager::new(config.use_new_task_system, tasks.clone(), pool);

        Ok(Self {
            config,
            bus,
            resource_probe,
            connectors,
            store,
            monitor,
            tasks,
            mining,
            shutdown,
            unified_tasks,
        })
    }

    /// Starts every background loop (cron dispatch, resource sampling,
    /// auto-shutdown predicates/signal routing). Returns immediately;
    /// callers await [`Engine::wait_for_shutdown`] to block until a
    /// trigger fires.
    pub fn start(&self) {
        self.tasks.start();
        self.shutdown.start();
        let _handle = self.resource_probe.clone().spawn_sampling_loop(std::time::Duration::from_secs(10));
    }

    /// Blocks until the auto-shutdown supervisor observes a trigger
    /// (idle, resource pressure, task completion, or an OS signal), then
    /// returns the reason. The caller — not this library — decides what
    /// "shutting down" means for its own process (draining the worker
    /// pool, flushing a store, calling `std::process::exit`).
    pub async fn wait_for_shutdown(&self) -> wiseflow_shutdown::ShutdownReason {
        self.shutdown.wait_for_trigger().await
    }
}
