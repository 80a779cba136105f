//! Engine-wide configuration: TOML file, then `WISEFLOW_*` environment
//! overrides, then validation (spec.md §4.14, ambient concern added in
//! the expanded spec).
//!
//! Loading order and the `WISEFLOW_<SECTION>_<KEY>` override shape are
//! grounded on `examples/original_source/core/task/config.py`'s
//! load-then-override-then-validate sequence, re-expressed with
//! `serde`/`toml` rather than hand-rolled `json`/file IO.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use wiseflow_core::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub min_workers: usize,
    pub max_workers: usize,
    pub adjust_interval_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self { min_workers: 2, max_workers: 10, adjust_interval_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub history_size: usize,
    pub failure_rate_threshold: f64,
    pub long_running_multiplier: f64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self { history_size: 100, failure_rate_threshold: 0.5, long_running_multiplier: 2.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSection {
    pub enabled: bool,
    pub idle_timeout_secs: u64,
    pub check_interval_secs: u64,
    pub resource_pressure_enabled: bool,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
    pub completion_enabled: bool,
    pub completion_wait_secs: u64,
    pub graceful_shutdown_enabled: bool,
    pub graceful_shutdown_timeout_secs: u64,
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_timeout_secs: 3600,
            check_interval_secs: 300,
            resource_pressure_enabled: true,
            cpu_pct: 90.0,
            mem_pct: 85.0,
            disk_pct: 90.0,
            completion_enabled: true,
            completion_wait_secs: 300,
            graceful_shutdown_enabled: true,
            graceful_shutdown_timeout_secs: 30,
        }
    }
}

/// Top-level engine configuration (spec.md §4.14's "configuration
/// switch" plus the ambient worker/monitor/shutdown knobs every
/// composed component needs).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Routes the unified facade (C14) to the new path (C8+C9) when
    /// `true`, or to the legacy Task Manager (C10) when `false`.
    pub use_new_task_system: bool,
    pub history_limit: usize,
    pub default_task_timeout_secs: Option<u64>,
    pub worker: WorkerSection,
    pub monitor: MonitorSection,
    pub shutdown: ShutdownSection,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_new_task_system: false,
            history_limit: 1000,
            default_task_timeout_secs: None,
            worker: WorkerSection::default(),
            monitor: MonitorSection::default(),
            shutdown: ShutdownSection::default(),
        }
    }
}

impl EngineConfig {
    /// Loads from `path` if it exists, falling back to defaults, then
    /// layers `WISEFLOW_*` environment overrides on top, then validates.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let mut config = if path.exists() {
            Self::from_toml_str(&std::fs::read_to_string(path).map_err(|e| EngineError::Config(e.to_string()))?)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> EngineResult<Self> {
        toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// `WISEFLOW_USE_NEW_TASK_SYSTEM=1`, `WISEFLOW_MAX_WORKERS=16`,
    /// `WISEFLOW_MIN_WORKERS=4`, `WISEFLOW_IDLE_TIMEOUT_SECS=600`,
    /// `WISEFLOW_DEFAULT_TASK_TIMEOUT_SECS=30`. Unrecognized or
    /// unparsable values are left at the prior setting rather than
    /// rejected outright; `validate` catches anything that matters.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WISEFLOW_USE_NEW_TASK_SYSTEM") {
            if let Ok(parsed) = v.parse() {
                self.use_new_task_system = parsed;
            }
        }
        if let Ok(v) = std::env::var("WISEFLOW_MAX_WORKERS") {
            if let Ok(parsed) = v.parse() {
                self.worker.max_workers = parsed;
            }
        }
        if let Ok(v) = std::env::var("WISEFLOW_MIN_WORKERS") {
            if let Ok(parsed) = v.parse() {
                self.worker.min_workers = parsed;
            }
        }
        if let Ok(v) = std::env::var("WISEFLOW_IDLE_TIMEOUT_SECS") {
            if let Ok(parsed) = v.parse() {
                self.shutdown.idle_timeout_secs = parsed;
            }
        }
        if let Ok(v) = std::env::var("WISEFLOW_DEFAULT_TASK_TIMEOUT_SECS") {
            if let Ok(parsed) = v.parse() {
                self.default_task_timeout_secs = Some(parsed);
            }
        }
    }

    /// Rejects `timeout=0` the same way task registration does
    /// (spec.md §8), plus the worker pool's own sizing invariant.
    pub fn validate(&self) -> EngineResult<()> {
        if self.default_task_timeout_secs == Some(0) {
            return Err(EngineError::Validation {
                message: "default_task_timeout_secs must be greater than zero".to_string(),
            });
        }
        if self.worker.min_workers == 0 || self.worker.max_workers < self.worker.min_workers {
            return Err(EngineError::Validation {
                message: "worker.max_workers must be >= worker.min_workers > 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn default_task_timeout(&self) -> Option<Duration> {
        self.default_task_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_default_timeout_is_rejected() {
        let config = EngineConfig { default_task_timeout_secs: Some(0), ..EngineConfig::default() };
        assert!(matches!(config.validate(), Err(EngineError::Validation { .. })));
    }

    #[test]
    fn inverted_worker_bounds_are_rejected() {
        let config = EngineConfig {
            worker: WorkerSection { min_workers: 8, max_workers: 2, ..WorkerSection::default() },
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Validation { .. })));
    }

    #[test]
    fn toml_round_trip_overrides_a_section() {
        let raw = r#"
            use_new_task_system = true

            [worker]
            max_workers = 16
        "#;
        let config = EngineConfig::from_toml_str(raw).unwrap();
        assert!(config.use_new_task_system);
        assert_eq!(config.worker.max_workers, 16);
        assert_eq!(config.worker.min_workers, 2);
    }
}
