//! Narrow capability interfaces the core depends on but does not
//! implement (spec.md §6): `Store` for persistence and `HTMLFetcher` for
//! content extraction/markdown rendering. Concrete implementations are
//! host-level concerns; this crate only ships [`MemoryStore`], an
//! in-memory `Store` used by tests and as a development default.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Sort direction for `Store::read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A single sort key plus direction.
#[derive(Debug, Clone)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

/// A simple equality filter over top-level JSON fields. Richer query
/// semantics are a host-level concern (spec.md §1 Out-of-scope).
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub equals: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    fn matches(&self, record: &Value) -> bool {
        self.equals.iter().all(|(field, expected)| {
            record.get(field).map(|v| v == expected).unwrap_or(false)
        })
    }
}

/// The persistence capability the engine depends on. Collections are
/// named loosely (`"mining_tasks"`, `"mining_interconnections"`,
/// `"infos"`, `"resource_alerts"`, `"shutdown_events"`, spec.md §6);
/// records are opaque JSON bodies with an `id` field added on `add`.
#[async_trait]
pub trait Store: Send + Sync {
    async fn read(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<Sort>,
        limit: Option<usize>,
    ) -> EngineResult<Vec<Value>>;

    async fn read_one(&self, collection: &str, id: &str) -> EngineResult<Option<Value>>;

    async fn add(&self, collection: &str, body: Value) -> EngineResult<String>;

    async fn update(&self, collection: &str, id: &str, body: Value) -> EngineResult<bool>;

    async fn delete(&self, collection: &str, id: &str) -> EngineResult<bool>;
}

/// What C6 needs from a rendering collaborator: fetch a URL and return
/// rendered Markdown plus extracted metadata and media references. The
/// actual HTTP/headless-browser orchestration lives outside this crate
/// (spec.md §1 Non-goals).
#[async_trait]
pub trait HTMLFetcher: Send + Sync {
    async fn fetch(&self, url: &str, opts: &FetchOptions) -> EngineResult<RenderedPage>;
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub headers: HashMap<String, String>,
    pub timeout_s: Option<u64>,
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    pub markdown: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub publish_date: Option<String>,
    pub media: Vec<String>,
    pub http_status: Option<u16>,
}

/// An in-memory, process-local `Store`. Not a persistence engine
/// (Non-goal, spec.md §1) — useful for tests and as a default when no
/// external store is wired in.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<Sort>,
        limit: Option<usize>,
    ) -> EngineResult<Vec<Value>> {
        let collections = self.collections.lock().unwrap();
        let mut records: Vec<Value> = collections
            .get(collection)
            .map(|c| c.values().filter(|v| filter.matches(v)).cloned().collect())
            .unwrap_or_default();

        if let Some(sort) = sort {
            records.sort_by(|a, b| {
                let av = a.get(&sort.field);
                let bv = b.get(&sort.field);
                let ordering = format!("{:?}", av).cmp(&format!("{:?}", bv));
                match sort.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = limit {
            records.truncate(limit);
        }

        Ok(records)
    }

    async fn read_one(&self, collection: &str, id: &str) -> EngineResult<Option<Value>> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn add(&self, collection: &str, mut body: Value) -> EngineResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        if let Value::Object(map) = &mut body {
            map.insert("id".to_string(), Value::String(id.clone()));
        } else {
            return Err(EngineError::Store("record body must be a JSON object".into()));
        }
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), body);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, body: Value) -> EngineResult<bool> {
        let mut collections = self.collections.lock().unwrap();
        if let Some(c) = collections.get_mut(collection) {
            if c.contains_key(id) {
                c.insert(id.to_string(), body);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn delete(&self, collection: &str, id: &str) -> EngineResult<bool> {
        let mut collections = self.collections.lock().unwrap();
        Ok(collections
            .get_mut(collection)
            .map(|c| c.remove(id).is_some())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_read_update_delete_round_trip() {
        let store = MemoryStore::new();
        let id = store
            .add("infos", serde_json::json!({"tag": "t1", "content": "hello"}))
            .await
            .unwrap();

        let fetched = store.read_one("infos", &id).await.unwrap().unwrap();
        assert_eq!(fetched["content"], "hello");

        let filtered = store
            .read("infos", &Filter::new().eq("tag", "t1"), None, None)
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);

        let updated = store
            .update("infos", &id, serde_json::json!({"tag": "t1", "content": "updated"}))
            .await
            .unwrap();
        assert!(updated);

        let deleted = store.delete("infos", &id).await.unwrap();
        assert!(deleted);
        assert!(store.read_one("infos", &id).await.unwrap().is_none());
    }
}
