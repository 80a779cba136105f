//! The sidecar `key -> ETag` map, loaded once at startup and flushed on
//! every update (spec.md §4.3 "a single ETag map file loaded at start
//! and flushed at end"; flushing per-update here trades a little extra
//! IO for durability across ungraceful process exits, which matters
//! more for a long-running ingestion engine than for a short-lived
//! tool).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::warn;

pub(crate) struct EtagMap {
    path: PathBuf,
    map: RwLock<HashMap<String, String>>,
}

impl EtagMap {
    pub(crate) async fn load(dir: &Path) -> Self {
        let path = dir.join("etags.json");
        let map = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(%err, "etag map corrupt, starting empty");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            map: RwLock::new(map),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<String> {
        self.map.read().unwrap().get(key).cloned()
    }

    pub(crate) async fn set(&self, key: &str, etag: String) {
        {
            let mut map = self.map.write().unwrap();
            map.insert(key.to_string(), etag);
        }
        self.flush().await;
    }

    pub(crate) async fn flush(&self) {
        let snapshot = self.map.read().unwrap().clone();
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let bytes = serde_json::to_vec(&snapshot).expect("etag map always serializes");
        let tmp = self.path.with_extension("json.tmp");
        if tokio::fs::write(&tmp, &bytes).await.is_ok() {
            let _ = tokio::fs::rename(&tmp, &self.path).await;
        }
    }
}
