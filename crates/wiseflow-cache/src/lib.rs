//! Response Cache (C3): an on-disk cache for idempotent fetches keyed
//! by `(endpoint, params)`, with TTL and a sidecar ETag map
//! (spec.md §4.3).
//!
//! Grounded on the teacher's `tower-resilience-cache::store` for the
//! entry/TTL/eviction shape, adapted from an in-memory LRU to the
//! disk-backed layout spec.md §6 requires (one JSON file per key under
//! a cache directory, plus a single `etags.json` at the root).

mod etags;
mod key;
mod store;

pub use key::cache_key;

use etags::EtagMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use store::StoredEntry;
use wiseflow_core::error::{EngineError, EngineResult};

/// A cache hit: the stored body plus the ETag known for this key, if
/// any (used to send `If-None-Match` on the next request).
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub body: serde_json::Value,
    pub etag: Option<String>,
}

/// The on-disk response cache.
pub struct ResponseCache {
    dir: PathBuf,
    default_ttl: Duration,
    etags: EtagMap,
}

impl ResponseCache {
    /// Opens (creating if absent) a cache directory and loads its ETag
    /// sidecar map.
    pub async fn open(dir: impl Into<PathBuf>, default_ttl: Duration) -> EngineResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineError::Store(format!("cache dir {}: {e}", dir.display())))?;
        let etags = EtagMap::load(&dir).await;
        Ok(Self {
            dir,
            default_ttl,
            etags,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the body for `key` if a fresh entry exists
    /// (`now - stored_at <= ttl`), along with any known ETag so the
    /// fetcher can revalidate on a miss.
    pub async fn get(&self, key: &str) -> Option<CacheHit> {
        let entry = store::read_entry(&self.dir, key).await?;
        let etag = self.etags.get(key);
        if entry.is_fresh() {
            Some(CacheHit { body: entry.body, etag })
        } else {
            None
        }
    }

    /// Returns the ETag known for `key`, independent of freshness — a
    /// conditional request sends `If-None-Match` even against a stale
    /// body (spec.md §4.4 step 2).
    pub fn etag(&self, key: &str) -> Option<String> {
        self.etags.get(key)
    }

    /// Stores a fresh body (and, if present, its ETag) for `key`.
    pub async fn put(&self, key: &str, body: serde_json::Value, etag: Option<String>) -> EngineResult<()> {
        let entry = StoredEntry::new(body, self.default_ttl);
        store::write_entry(&self.dir, key, &entry)
            .await
            .map_err(|e| EngineError::Store(format!("cache write {key}: {e}")))?;
        if let Some(etag) = etag {
            self.etags.set(key, etag).await;
        }
        Ok(())
    }

    /// Re-stamps an existing entry as fresh without changing its body —
    /// used on a `304 Not Modified` response (spec.md §4.4 step 4,
    /// "cache validated").
    pub async fn revalidate(&self, key: &str) -> EngineResult<()> {
        if let Some(entry) = store::read_entry(&self.dir, key).await {
            let refreshed = StoredEntry::new(entry.body, self.default_ttl);
            store::write_entry(&self.dir, key, &refreshed)
                .await
                .map_err(|e| EngineError::Store(format!("cache revalidate {key}: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_returns_fresh_body() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), Duration::from_secs(300)).await.unwrap();

        let key = cache_key("GET", "/repos/octocat/hello", &[]);
        cache.put(&key, serde_json::json!({"name": "hello"}), Some("E1".into())).await.unwrap();

        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.body["name"], "hello");
        assert_eq!(hit.etag.as_deref(), Some("E1"));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path(), Duration::from_millis(10)).await.unwrap();

        let key = "k";
        cache.put(key, serde_json::json!({"a": 1}), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get(key).await.is_none());
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("bad.json"), b"not json").await.unwrap();
        let cache = ResponseCache::open(dir.path(), Duration::from_secs(300)).await.unwrap();

        assert!(cache.get("bad").await.is_none());
    }

    #[tokio::test]
    async fn etag_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = ResponseCache::open(dir.path(), Duration::from_secs(300)).await.unwrap();
            cache.put("k", serde_json::json!({"a": 1}), Some("E2".into())).await.unwrap();
        }
        let reopened = ResponseCache::open(dir.path(), Duration::from_secs(300)).await.unwrap();
        assert_eq!(reopened.etag("k").as_deref(), Some("E2"));
    }
}
