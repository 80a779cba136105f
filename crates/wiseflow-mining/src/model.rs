//! Persisted shapes (spec.md §3): `MiningTask` and `TaskInterconnection`.
//!
//! Grounded on `examples/original_source/core/task/data_mining_manager.py`'s
//! `DataMiningTask`/`TaskInterconnection` dataclasses, trimmed to the
//! fields spec.md names and re-expressed as `serde`-round-trippable
//! records since persistence here goes through `wiseflow_core::Store`
//! rather than a bespoke PocketBase client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wiseflow_worker::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MiningStatus {
    Active,
    Inactive,
    Running,
    Completed,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningTask {
    pub id: String,
    pub name: String,
    pub task_type: String,
    pub description: String,
    pub search_params: Value,
    pub status: MiningStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_count: u32,
    pub timeout: Option<u64>,
    #[serde(default)]
    pub results: Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub context_files: Vec<String>,
    /// Participates in the auto-shutdown supervisor's completion
    /// predicate when `true` (spec.md §4.12).
    #[serde(default)]
    pub auto_shutdown: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterconnectionKind {
    Feed,
    Filter,
    Combine,
    Sequence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterconnectionStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInterconnection {
    pub id: String,
    pub source_task_id: String,
    pub target_task_id: String,
    #[serde(rename = "type")]
    pub kind: InterconnectionKind,
    pub status: InterconnectionStatus,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Value,
}

