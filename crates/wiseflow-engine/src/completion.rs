//! Bridges the data-mining manager (C11) to the auto-shutdown
//! supervisor's [`CompletionSource`](wiseflow_shutdown::CompletionSource)
//! trait.
//!
//! `wiseflow-shutdown` cannot depend on `wiseflow-mining` directly (that
//! would invert the layering C12 is meant to sit above), and
//! `wiseflow-mining` cannot implement a trait from a crate it doesn't
//! depend on either — Rust's orphan rule blocks `impl Foreign for
//! Foreign` from a third crate. This newtype is local to
//! `wiseflow-engine`, which depends on both, so it can legally stand in
//! the middle.

use async_trait::async_trait;
use std::sync::Arc;
use wiseflow_core::error::EngineResult;
use wiseflow_mining::{MiningManager, MiningStatus};
use wiseflow_shutdown::{CompletionSource, CompletionStatus};

pub struct MiningCompletionSource {
    mining: Arc<MiningManager>,
}

impl MiningCompletionSource {
    pub fn new(mining: Arc<MiningManager>) -> Self {
        Self { mining }
    }
}

#[async_trait]
impl CompletionSource for MiningCompletionSource {
    async fn completion_status(&self) -> EngineResult<CompletionStatus> {
        let tasks = self.mining.list_tasks(None).await?;
        let auto_shutdown: Vec<_> = tasks.iter().filter(|t| t.auto_shutdown).collect();

        if auto_shutdown.is_empty() {
            return Ok(CompletionStatus { has_auto_shutdown_tasks: false, all_terminal: false });
        }

        let all_terminal = auto_shutdown
            .iter()
            .all(|t| matches!(t.status, MiningStatus::Completed | MiningStatus::Error | MiningStatus::Cancelled));

        Ok(CompletionStatus { has_auto_shutdown_tasks: true, all_terminal })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiseflow_connector::ConnectorRegistry;
    use wiseflow_core::collaborators::MemoryStore;
    use wiseflow_mining::MiningTaskRegistration;

    fn manager() -> Arc<MiningManager> {
        Arc::new(MiningManager::new(Arc::new(MemoryStore::new()), Arc::new(ConnectorRegistry::new()), None))
    }

    #[tokio::test]
    async fn no_auto_shutdown_tasks_reports_absent() {
        let source = MiningCompletionSource::new(manager());
        let status = source.completion_status().await.unwrap();
        assert!(!status.has_auto_shutdown_tasks);
    }

    #[tokio::test]
    async fn active_auto_shutdown_task_is_not_terminal() {
        let mining = manager();
        let mut reg = MiningTaskRegistration::new("t", "web");
        reg.auto_shutdown = true;
        mining.create_task(reg).await.unwrap();

        let source = MiningCompletionSource::new(mining);
        let status = source.completion_status().await.unwrap();
        assert!(status.has_auto_shutdown_tasks);
        assert!(!status.all_terminal);
    }
}
