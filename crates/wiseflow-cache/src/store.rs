//! Disk-backed body storage: one JSON file per cache key, written
//! atomically (write-to-tmp, rename) so readers never observe a
//! partial write (spec.md §5 "writes are atomic").

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredEntry {
    pub(crate) body: serde_json::Value,
    pub(crate) stored_at_unix_ms: u64,
    pub(crate) ttl_s: u64,
}

impl StoredEntry {
    pub(crate) fn new(body: serde_json::Value, ttl: Duration) -> Self {
        Self {
            body,
            stored_at_unix_ms: now_unix_ms(),
            ttl_s: ttl.as_secs(),
        }
    }

    pub(crate) fn is_fresh(&self) -> bool {
        let age_ms = now_unix_ms().saturating_sub(self.stored_at_unix_ms);
        age_ms <= self.ttl_s.saturating_mul(1000)
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn entry_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

/// Reads and parses a body file. Any IO or parse failure is treated as
/// a miss, not a fatal error (spec.md §4.3 "Corrupt or unreadable
/// entries behave as misses and are not fatal").
pub(crate) async fn read_entry(dir: &Path, key: &str) -> Option<StoredEntry> {
    let path = entry_path(dir, key);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(key, %err, "cache entry unreadable, treating as miss");
            return None;
        }
    };
    match serde_json::from_slice::<StoredEntry>(&bytes) {
        Ok(entry) => Some(entry),
        Err(err) => {
            warn!(key, %err, "cache entry corrupt, treating as miss");
            None
        }
    }
}

/// Atomically writes a body file: write to `<key>.json.tmp`, then
/// rename over the final path.
pub(crate) async fn write_entry(dir: &Path, key: &str, entry: &StoredEntry) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let final_path = entry_path(dir, key);
    let tmp_path = dir.join(format!("{key}.json.tmp"));
    let bytes = serde_json::to_vec(entry).expect("StoredEntry always serializes");
    tokio::fs::write(&tmp_path, &bytes).await?;
    tokio::fs::rename(&tmp_path, &final_path).await?;
    Ok(())
}
