//! The manager itself (spec.md §4.11).
//!
//! Grounded on `examples/original_source/core/task/data_mining_manager.py`'s
//! `DataMiningManager` — `run_task`'s status machine and exponential
//! backoff retry, `process_interconnected_tasks`'s per-type propagation,
//! `delete_task`'s running-task refusal and edge cascade — rebuilt over
//! `wiseflow_core::Store` instead of a direct PocketBase client and
//! `wiseflow_connector::ConnectorRegistry` instead of a `task_type ->
//! class` dict.

use crate::model::{InterconnectionKind, InterconnectionStatus, MiningStatus, MiningTask, TaskInterconnection};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};
use wiseflow_connector::{ConnectorParams, ConnectorRegistry};
use wiseflow_core::collaborators::{Filter, Store};
use wiseflow_core::error::{EngineError, EngineResult};
use wiseflow_core::events::{EngineEvent, EventBus};
use wiseflow_worker::Priority;

const TASKS: &str = "mining_tasks";
const INTERCONNECTIONS: &str = "mining_interconnections";

pub struct MiningTaskRegistration {
    pub name: String,
    pub task_type: String,
    pub description: String,
    pub search_params: Value,
    pub priority: Priority,
    pub dependencies: Vec<String>,
    pub max_retries: u32,
    pub timeout: Option<u64>,
    pub context_files: Vec<String>,
    pub auto_shutdown: bool,
}

impl MiningTaskRegistration {
    pub fn new(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            description: String::new(),
            search_params: Value::Object(Default::default()),
            priority: Priority::Normal,
            dependencies: Vec::new(),
            max_retries: 0,
            timeout: None,
            context_files: Vec::new(),
            auto_shutdown: false,
        }
    }
}

pub struct MiningManager {
    store: Arc<dyn Store>,
    connectors: Arc<ConnectorRegistry>,
    bus: Option<EventBus>,
    tasks_lock: Mutex<()>,
    interconnections_lock: Mutex<()>,
}

impl MiningManager {
    pub fn new(store: Arc<dyn Store>, connectors: Arc<ConnectorRegistry>, bus: Option<EventBus>) -> Self {
        Self {
            store,
            connectors,
            bus,
            tasks_lock: Mutex::new(()),
            interconnections_lock: Mutex::new(()),
        }
    }

    fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    async fn try_task(&self, task_id: &str) -> EngineResult<Option<MiningTask>> {
        match self.store.read_one(TASKS, task_id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value).map_err(|e| EngineError::Store(e.to_string()))?)),
            None => Ok(None),
        }
    }

    async fn require_task(&self, task_id: &str) -> EngineResult<MiningTask> {
        self.try_task(task_id)
            .await?
            .ok_or_else(|| EngineError::Validation { message: format!("task {task_id} not found") })
    }

    async fn persist_task(&self, task: &MiningTask) -> EngineResult<()> {
        let value = serde_json::to_value(task).map_err(|e| EngineError::Store(e.to_string()))?;
        self.store.update(TASKS, &task.id, value).await?;
        Ok(())
    }

    pub async fn create_task(&self, reg: MiningTaskRegistration) -> EngineResult<String> {
        if reg.timeout == Some(0) {
            return Err(EngineError::Validation {
                message: "timeout must be greater than zero".to_string(),
            });
        }

        let _guard = self.tasks_lock.lock().await;
        for dep in &reg.dependencies {
            self.require_task(dep).await?;
        }

        let now = Utc::now();
        let mut task = MiningTask {
            id: String::new(),
            name: reg.name,
            task_type: reg.task_type,
            description: reg.description,
            search_params: reg.search_params,
            status: MiningStatus::Active,
            priority: reg.priority,
            dependencies: reg.dependencies,
            max_retries: reg.max_retries,
            retry_count: 0,
            timeout: reg.timeout,
            results: Value::Null,
            error: None,
            created_at: now,
            updated_at: now,
            context_files: reg.context_files,
            auto_shutdown: reg.auto_shutdown,
        };

        let body = serde_json::to_value(&task).map_err(|e| EngineError::Store(e.to_string()))?;
        let id = self.store.add(TASKS, body).await?;
        task.id = id.clone();
        self.persist_task(&task).await?;
        info!(task_id = %id, task_type = %task.task_type, "created mining task");
        Ok(id)
    }

    pub async fn get_task(&self, task_id: &str) -> EngineResult<Option<MiningTask>> {
        self.try_task(task_id).await
    }

    pub async fn update_task(&self, task_id: &str, patch: impl FnOnce(&mut MiningTask)) -> EngineResult<bool> {
        let _guard = self.tasks_lock.lock().await;
        let mut task = match self.try_task(task_id).await? {
            Some(task) => task,
            None => return Ok(false),
        };
        patch(&mut task);
        task.updated_at = Utc::now();
        self.persist_task(&task).await?;
        Ok(true)
    }

    pub async fn delete_task(&self, task_id: &str) -> EngineResult<bool> {
        {
            let _guard = self.tasks_lock.lock().await;
            let task = match self.try_task(task_id).await? {
                Some(task) => task,
                None => return Ok(false),
            };
            if task.status == MiningStatus::Running {
                return Err(EngineError::Validation {
                    message: format!("task {task_id} is running and cannot be deleted"),
                });
            }
            self.store.delete(TASKS, task_id).await?;
        }

        let outbound = self.interconnections_for_task(task_id, true).await?;
        let inbound = self.interconnections_for_task(task_id, false).await?;
        for edge in outbound.into_iter().chain(inbound) {
            self.delete_interconnection(&edge.id).await?;
        }

        info!(task_id, "deleted mining task");
        Ok(true)
    }

    pub async fn list_tasks(&self, status: Option<MiningStatus>) -> EngineResult<Vec<MiningTask>> {
        let mut filter = Filter::new();
        if let Some(status) = status {
            filter = filter.eq("status", serde_json::to_value(status).map_err(|e| EngineError::Store(e.to_string()))?);
        }
        let values = self.store.read(TASKS, &filter, None, None).await?;
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(|e| EngineError::Store(e.to_string())))
            .collect()
    }

    pub async fn toggle_task_status(&self, task_id: &str, active: bool) -> EngineResult<bool> {
        let _guard = self.tasks_lock.lock().await;
        let mut task = match self.try_task(task_id).await? {
            Some(task) => task,
            None => return Ok(false),
        };
        if task.status == MiningStatus::Running {
            return Err(EngineError::Validation {
                message: format!("task {task_id} is running, cannot toggle status"),
            });
        }
        task.status = if active { MiningStatus::Active } else { MiningStatus::Inactive };
        task.updated_at = Utc::now();
        self.persist_task(&task).await?;
        Ok(true)
    }

    pub async fn create_interconnection(
        &self,
        source_task_id: &str,
        target_task_id: &str,
        kind: InterconnectionKind,
        description: String,
        metadata: Value,
    ) -> EngineResult<String> {
        self.require_task(source_task_id).await?;
        self.require_task(target_task_id).await?;

        let _guard = self.interconnections_lock.lock().await;
        let mut edge = TaskInterconnection {
            id: String::new(),
            source_task_id: source_task_id.to_string(),
            target_task_id: target_task_id.to_string(),
            kind,
            status: InterconnectionStatus::Active,
            description,
            metadata,
        };
        let body = serde_json::to_value(&edge).map_err(|e| EngineError::Store(e.to_string()))?;
        let id = self.store.add(INTERCONNECTIONS, body).await?;
        edge.id = id.clone();
        let value = serde_json::to_value(&edge).map_err(|e| EngineError::Store(e.to_string()))?;
        self.store.update(INTERCONNECTIONS, &id, value).await?;
        Ok(id)
    }

    pub async fn delete_interconnection(&self, id: &str) -> EngineResult<bool> {
        let _guard = self.interconnections_lock.lock().await;
        self.store.delete(INTERCONNECTIONS, id).await
    }

    pub async fn interconnections_for_task(&self, task_id: &str, as_source: bool) -> EngineResult<Vec<TaskInterconnection>> {
        let field = if as_source { "source_task_id" } else { "target_task_id" };
        let filter = Filter::new().eq(field, task_id);
        let values = self.store.read(INTERCONNECTIONS, &filter, None, None).await?;
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(|e| EngineError::Store(e.to_string())))
            .collect()
    }

    /// Runs one task to completion, retrying with `2^(retry_count-1)`
    /// second backoff on failure up to `max_retries` (spec.md §4.11
    /// step 5). Loops instead of the original's self-recursion — same
    /// retry semantics, no recursive `async fn` boxing.
    pub async fn run_task(&self, task_id: &str) -> EngineResult<Value> {
        loop {
            let task = self.require_task(task_id).await?;
            if task.status != MiningStatus::Active {
                return Err(EngineError::Validation {
                    message: format!("task {task_id} is not active, cannot run"),
                });
            }

            self.update_task(task_id, |t| t.status = MiningStatus::Running).await?;
            self.publish(EngineEvent::TaskStarted { task_id: task_id.to_string() });
            info!(task_id, task_type = %task.task_type, "running mining task");

            match self.execute_once(&task).await {
                Ok(results) => {
                    let processed = self.process_interconnected_tasks(task_id, results).await?;
                    self.update_task(task_id, |t| {
                        t.status = MiningStatus::Completed;
                        t.results = processed.clone();
                        t.error = None;
                    })
                    .await?;
                    self.publish(EngineEvent::TaskCompleted { task_id: task_id.to_string(), execution_time_ms: 0 });
                    return Ok(processed);
                }
                Err(EngineError::Cancelled) => {
                    self.update_task(task_id, |t| t.status = MiningStatus::Cancelled).await?;
                    self.publish(EngineEvent::TaskCancelled { task_id: task_id.to_string() });
                    return Err(EngineError::Cancelled);
                }
                Err(err) => {
                    if task.retry_count < task.max_retries {
                        let retry_count = task.retry_count + 1;
                        self.update_task(task_id, |t| {
                            t.status = MiningStatus::Active;
                            t.retry_count = retry_count;
                        })
                        .await?;
                        let wait = Duration::from_secs(2u64.saturating_pow(retry_count.saturating_sub(1).min(20)));
                        warn!(task_id, retry_count, max_retries = task.max_retries, ?wait, %err, "mining task failed, retrying");
                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    self.update_task(task_id, |t| {
                        t.status = MiningStatus::Error;
                        t.error = Some(err.to_string());
                    })
                    .await?;
                    self.publish(EngineEvent::TaskFailed { task_id: task_id.to_string(), error: err.to_string() });
                    return Err(err);
                }
            }
        }
    }

    async fn execute_once(&self, task: &MiningTask) -> EngineResult<Value> {
        let handle = self.connectors.require(&task.task_type)?;
        handle.connector().initialize().await?;

        let params: ConnectorParams = task
            .search_params
            .as_object()
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let started = Instant::now();
        let collect = handle.connector().collect(&params);
        let outcome = match task.timeout {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), collect)
                .await
                .unwrap_or(Err(EngineError::Timeout)),
            None => collect.await,
        };

        if let Err(err) = handle.connector().shutdown().await {
            warn!(task_id = %task.id, %err, "error disconnecting connector");
        }

        let items = outcome?;
        Ok(json!({
            "items": items,
            "task_id": task.id,
            "task_type": task.task_type,
            "processed_at": Utc::now().to_rfc3339(),
            "execution_time": started.elapsed().as_secs_f64(),
        }))
    }

    /// Applies each outbound interconnection's propagation rule (spec.md
    /// §4.11 step 4). Mirrors `process_interconnected_tasks`, including
    /// its per-edge isolation: one edge's propagation failing does not
    /// abort the others.
    async fn process_interconnected_tasks(&self, task_id: &str, results: Value) -> EngineResult<Value> {
        let edges = self.interconnections_for_task(task_id, true).await?;
        if edges.is_empty() {
            return Ok(results);
        }

        let mut processed = results.clone();
        for edge in edges {
            if edge.status != InterconnectionStatus::Active {
                continue;
            }
            if let Err(err) = self.apply_interconnection(&edge, task_id, &results, &mut processed).await {
                warn!(interconnection_id = %edge.id, %err, "failed to propagate interconnection");
            }
        }
        Ok(processed)
    }

    async fn apply_interconnection(
        &self,
        edge: &TaskInterconnection,
        task_id: &str,
        results: &Value,
        processed: &mut Value,
    ) -> EngineResult<()> {
        let target_id = edge.target_task_id.clone();

        match edge.kind {
            InterconnectionKind::Feed => {
                let payload = json!({ "task_id": task_id, "results": results });
                self.update_task(&target_id, |target| {
                    as_object(&mut target.search_params).insert("input_from_task".to_string(), payload);
                })
                .await?;
                self.spawn_run(target_id);
            }
            InterconnectionKind::Filter => {
                let filtered_by = json!({ "task_id": task_id, "filter_criteria": results });
                self.update_task(&target_id, |target| {
                    as_object(&mut target.results).insert("filtered_by".to_string(), filtered_by);
                })
                .await?;
            }
            InterconnectionKind::Combine => {
                let target = self.require_task(&target_id).await?;
                let combined = json!({
                    "source_task": { "task_id": task_id, "results": results },
                    "target_task": { "task_id": target_id, "results": target.results },
                    "combined_at": Utc::now().to_rfc3339(),
                });
                self.update_task(&target_id, |t| t.results = combined).await?;
                as_object(processed).insert("combined_with".to_string(), Value::String(target_id.clone()));
            }
            InterconnectionKind::Sequence => {
                self.spawn_run(target_id);
            }
        }

        Ok(())
    }

    fn spawn_run(&self, target_task_id: String) {
        let store = self.store.clone();
        let connectors = self.connectors.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let manager = MiningManager::new(store, connectors, bus);
            if let Err(err) = manager.run_task(&target_task_id).await {
                warn!(task_id = %target_task_id, %err, "interconnected task run failed");
            }
        });
    }
}

/// Coerces `value` into an object in place (replacing any non-object
/// content) and returns a mutable handle to its entries.
fn as_object(value: &mut Value) -> &mut serde_json::Map<String, Value> {
    if !value.is_object() {
        *value = json!({});
    }
    value.as_object_mut().expect("just coerced to an object")
}
