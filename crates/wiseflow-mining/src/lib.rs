//! Data-Mining Manager (C11): persisted, retrying, interconnected mining
//! tasks (spec.md §4.11).
//!
//! Grounded on `examples/original_source/core/task/data_mining_manager.py`'s
//! `DataMiningManager`, rebuilt over [`wiseflow_core::collaborators::Store`]
//! for persistence and [`wiseflow_connector::ConnectorRegistry`] for
//! source dispatch instead of a direct PocketBase client and a
//! `task_type -> connector class` dict.

pub mod manager;
pub mod model;

pub use manager::{MiningManager, MiningTaskRegistration};
pub use model::{InterconnectionKind, InterconnectionStatus, MiningStatus, MiningTask, TaskInterconnection};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiseflow_connector::{Connector, ConnectorParams, ConnectorRegistry};
    use wiseflow_core::collaborators::MemoryStore;
    use wiseflow_core::error::{EngineError, EngineResult};
    use wiseflow_core::item::DataItem;

    struct StubConnector {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl Connector for StubConnector {
        fn name(&self) -> &str {
            "stub"
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
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(EngineError::Transport("not yet".into()))
            } else {
                Ok(vec![DataItem::new("s1", "hello", "text/plain")])
            }
        }
        fn raw_config(&self) -> HashMap<String, serde_json::Value> {
            HashMap::new()
        }
    }

    fn manager_with(connector: StubConnector) -> MiningManager {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectorRegistry::new());
        registry.register("web", Arc::new(connector));
        MiningManager::new(store, registry, None)
    }

    #[tokio::test]
    async fn run_task_completes_and_persists_results() {
        let manager = manager_with(StubConnector { calls: AtomicUsize::new(0), fail_first: 0 });
        let mut reg = MiningTaskRegistration::new("crawl", "web");
        reg.search_params = json!({ "query": "rust" });
        let task_id = manager.create_task(reg).await.unwrap();

        let results = manager.run_task(&task_id).await.unwrap();
        assert!(results.get("items").is_some());

        let task = manager.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, MiningStatus::Completed);
    }

    #[tokio::test]
    async fn run_task_retries_then_succeeds() {
        let manager = manager_with(StubConnector { calls: AtomicUsize::new(0), fail_first: 2 });
        let mut reg = MiningTaskRegistration::new("crawl", "web");
        reg.max_retries = 3;
        let task_id = manager.create_task(reg).await.unwrap();

        manager.run_task(&task_id).await.unwrap();
        let task = manager.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, MiningStatus::Completed);
        assert_eq!(task.retry_count, 2);
    }

    #[tokio::test]
    async fn run_task_fails_after_exhausting_retries() {
        let manager = manager_with(StubConnector { calls: AtomicUsize::new(0), fail_first: 100 });
        let reg = MiningTaskRegistration::new("crawl", "web");
        let task_id = manager.create_task(reg).await.unwrap();

        let result = manager.run_task(&task_id).await;
        assert!(result.is_err());
        let task = manager.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, MiningStatus::Error);
        assert!(task.error.is_some());
    }

    #[tokio::test]
    async fn deleting_running_task_is_refused() {
        let manager = manager_with(StubConnector { calls: AtomicUsize::new(0), fail_first: 0 });
        let reg = MiningTaskRegistration::new("crawl", "web");
        let task_id = manager.create_task(reg).await.unwrap();
        manager.update_task(&task_id, |t| t.status = MiningStatus::Running).await.unwrap();

        let result = manager.delete_task(&task_id).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn deleting_task_cascades_to_interconnections() {
        let manager = manager_with(StubConnector { calls: AtomicUsize::new(0), fail_first: 0 });
        let source = manager.create_task(MiningTaskRegistration::new("a", "web")).await.unwrap();
        let target = manager.create_task(MiningTaskRegistration::new("b", "web")).await.unwrap();
        manager
            .create_interconnection(&source, &target, InterconnectionKind::Sequence, "next".into(), json!({}))
            .await
            .unwrap();

        manager.delete_task(&source).await.unwrap();
        let remaining = manager.interconnections_for_task(&target, false).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn feed_interconnection_seeds_target_search_params() {
        let manager = manager_with(StubConnector { calls: AtomicUsize::new(0), fail_first: 0 });
        let source = manager.create_task(MiningTaskRegistration::new("a", "web")).await.unwrap();
        let target_reg = MiningTaskRegistration::new("b", "web");
        let target = manager.create_task(target_reg).await.unwrap();
        manager
            .create_interconnection(&source, &target, InterconnectionKind::Feed, "feed".into(), json!({}))
            .await
            .unwrap();

        manager.run_task(&source).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let target_task = manager.get_task(&target).await.unwrap().unwrap();
        assert!(target_task.search_params.get("input_from_task").is_some());
    }
}
