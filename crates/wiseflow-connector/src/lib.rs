//! Connector Framework (C5): the abstract source contract, its async
//! retry-with-backoff wrapper, and the status snapshot every source
//! family exposes (spec.md §4.5).
//!
//! Grounded on `examples/original_source/core/connectors/base.py` for
//! the `initialize`/`shutdown`/`collect` shape and
//! `core/connectors/__init__.py`'s retry-with-backoff wrapper, expressed
//! here as the single async contract named in spec.md §9 ("Mixed
//! sync/async `collect`" redesign flag: only the async surface exists).

pub mod safe_config;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, warn};
use wiseflow_core::error::{EngineError, EngineResult};
use wiseflow_core::item::DataItem;

/// Source-specific parameters passed into `collect`/`collect_async`.
pub type ConnectorParams = HashMap<String, Value>;

/// A status snapshot (spec.md §4.5): `safe_config` has already been
/// filtered through [`safe_config::safe_config`] — nothing downstream
/// needs to re-redact it.
#[derive(Debug, Clone)]
pub struct ConnectorStatus {
    pub name: String,
    pub connector_type: String,
    pub last_run: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub enabled: bool,
    pub safe_config: HashMap<String, Value>,
}

/// The capability every source family implements. `collect` is the
/// only contract — there is no separate sync/async pair, per spec.md §9.
#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;
    fn connector_type(&self) -> &str;

    async fn initialize(&self) -> EngineResult<bool>;
    async fn shutdown(&self) -> EngineResult<bool>;
    async fn collect(&self, params: &ConnectorParams) -> EngineResult<Vec<DataItem>>;

    /// Raw (unfiltered) configuration, used by [`ConnectorHandle::status`]
    /// to build a safe snapshot. Connectors should return their full
    /// config here — filtering happens centrally, not per-connector, so
    /// a connector author cannot accidentally forget to redact a secret.
    fn raw_config(&self) -> HashMap<String, Value>;

    /// Extra non-secret config keys this connector wants surfaced
    /// beyond [`safe_config::DEFAULT_WHITELIST`] (spec.md §4.5
    /// "connector-declared extension list").
    fn safe_config_extensions(&self) -> &[&str] {
        &[]
    }
}

/// Wraps a `Connector` with the bookkeeping spec.md §4.5's retry harness
/// needs (`error_count`, `last_run`, `enabled`) without requiring every
/// connector implementation to carry that state itself.
pub struct ConnectorHandle {
    connector: Arc<dyn Connector>,
    error_count: AtomicU32,
    last_run: Mutex<Option<DateTime<Utc>>>,
    enabled: std::sync::atomic::AtomicBool,
}

impl ConnectorHandle {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            error_count: AtomicU32::new(0),
            last_run: Mutex::new(None),
            enabled: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn status(&self) -> ConnectorStatus {
        let raw = self.connector.raw_config();
        ConnectorStatus {
            name: self.connector.name().to_string(),
            connector_type: self.connector.connector_type().to_string(),
            last_run: *self.last_run.lock().unwrap(),
            error_count: self.error_count.load(Ordering::SeqCst),
            enabled: self.enabled.load(Ordering::SeqCst),
            safe_config: safe_config::safe_config(&raw, self.connector.safe_config_extensions()),
        }
    }

    /// `collect_with_retry` (spec.md §4.5): at most `max_retries`
    /// additional attempts beyond the first, with delay before attempt
    /// `k+1` of `retry_delay * 2^k`. Each retry increments `error_count`
    /// and logs a warning; a final failure logs an error and returns
    /// the last observed error. On success, updates `last_run`.
    pub async fn collect_with_retry(
        &self,
        params: &ConnectorParams,
        max_retries: u32,
        retry_delay: Duration,
    ) -> EngineResult<Vec<DataItem>> {
        let mut attempt = 0u32;
        loop {
            match self.connector.collect(params).await {
                Ok(items) => {
                    *self.last_run.lock().unwrap() = Some(Utc::now());
                    return Ok(items);
                }
                Err(err) => {
                    self.error_count.fetch_add(1, Ordering::SeqCst);
                    if attempt >= max_retries {
                        error!(
                            connector = self.connector.name(),
                            attempt,
                            %err,
                            "collect_with_retry exhausted retries"
                        );
                        return Err(err);
                    }
                    let delay = retry_delay * 2u32.pow(attempt);
                    warn!(
                        connector = self.connector.name(),
                        attempt,
                        ?delay,
                        %err,
                        "collect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// A registry mapping source-family names (`"web"`, `"github"`,
/// `"academic"`, `"youtube"`, `"code_search"`) to connector handles,
/// replacing the name-keyed imports the original used with an explicit
/// capability map populated by the host (spec.md §9 "Dynamic
/// registration of connectors").
#[derive(Default)]
pub struct ConnectorRegistry {
    handles: Mutex<HashMap<String, Arc<ConnectorHandle>>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task_type: impl Into<String>, connector: Arc<dyn Connector>) {
        self.handles
            .lock()
            .unwrap()
            .insert(task_type.into(), Arc::new(ConnectorHandle::new(connector)));
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<ConnectorHandle>> {
        self.handles.lock().unwrap().get(task_type).cloned()
    }

    pub fn require(&self, task_type: &str) -> EngineResult<Arc<ConnectorHandle>> {
        self.get(task_type)
            .ok_or_else(|| EngineError::Config(format!("no connector registered for '{task_type}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct FlakyConnector {
        attempts_before_success: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        fn name(&self) -> &str {
            "flaky"
        }
        fn connector_type(&self) -> &str {
            "web"
        }
        async fn initialize(&self) -> EngineResult<bool> {
            Ok(true)
        }
        async fn shutdown(&self) -> EngineResult<bool> {
            Ok(true)
        }
        async fn collect(&self, _params: &ConnectorParams) -> EngineResult<Vec<DataItem>> {
            let call = self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if call < self.attempts_before_success {
                Err(EngineError::Transport("not yet".into()))
            } else {
                Ok(vec![DataItem::new("id", "content", "text/plain")])
            }
        }
        fn raw_config(&self) -> HashMap<String, Value> {
            let mut map = HashMap::new();
            map.insert("api_key".to_string(), Value::String("secret".into()));
            map.insert("api_base".to_string(), Value::String("https://x".into()));
            map
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let connector = Arc::new(FlakyConnector {
            attempts_before_success: 2,
            calls: AtomicUsize::new(0),
        });
        let handle = ConnectorHandle::new(connector);

        let result = handle
            .collect_with_retry(&ConnectorParams::new(), 5, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(handle.status().error_count, 2);
        assert!(handle.status().last_run.is_some());
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let connector = Arc::new(FlakyConnector {
            attempts_before_success: 100,
            calls: AtomicUsize::new(0),
        });
        let handle = ConnectorHandle::new(connector);

        let result = handle
            .collect_with_retry(&ConnectorParams::new(), 2, Duration::from_millis(1))
            .await;
        assert!(result.is_err());
        assert_eq!(handle.status().error_count, 3);
    }

    #[test]
    fn status_never_leaks_secrets() {
        let connector = Arc::new(FlakyConnector {
            attempts_before_success: 0,
            calls: AtomicUsize::new(0),
        });
        let handle = ConnectorHandle::new(connector);
        let status = handle.status();
        assert!(!status.safe_config.contains_key("api_key"));
        assert!(status.safe_config.contains_key("api_base"));
    }
}
