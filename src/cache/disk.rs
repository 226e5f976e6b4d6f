use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::cache::{sha256_hex, CachedDecision, DecisionCache};
use crate::errors::{PilotError, PilotResult};

pub const DEFAULT_MAX_BYTES: u64 = 500 * 1024 * 1024;

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    stored_at_ms: i64,
    decision: CachedDecision,
}

struct EntryMeta {
    size: u64,
    last_access_ms: i64,
}

/// File-backed decision cache, one JSON file per entry, bounded by total
/// byte size with least-recently-accessed eviction.
///
/// A corrupt or unreadable store is wiped and recreated once at open time;
/// individually corrupt entries are dropped on read.
pub struct DiskCache {
    dir: PathBuf,
    max_bytes: u64,
    state: Mutex<HashMap<String, EntryMeta>>,
}

impl DiskCache {
    pub async fn open(dir: impl Into<PathBuf>, max_bytes: u64) -> PilotResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let state = match scan(&dir).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, dir = %dir.display(), "cache store corrupt, wiping");
                tokio::fs::remove_dir_all(&dir).await?;
                tokio::fs::create_dir_all(&dir).await?;
                scan(&dir).await?
            }
        };
        tracing::info!(
            dir = %dir.display(),
            entries = state.len(),
            "disk decision cache opened"
        );
        Ok(Self {
            dir,
            max_bytes,
            state: Mutex::new(state),
        })
    }

    fn entry_path(&self, file_stem: &str) -> PathBuf {
        self.dir.join(format!("{file_stem}.json"))
    }

    async fn evict_to_fit(&self, state: &mut HashMap<String, EntryMeta>, keep: &str) {
        let mut total: u64 = state.values().map(|m| m.size).sum();
        while total > self.max_bytes {
            let victim = state
                .iter()
                .filter(|(stem, _)| stem.as_str() != keep)
                .min_by_key(|(_, meta)| meta.last_access_ms)
                .map(|(stem, _)| stem.clone());
            let Some(stem) = victim else { break };
            if let Some(meta) = state.remove(&stem) {
                total -= meta.size;
            }
            if let Err(e) = tokio::fs::remove_file(self.entry_path(&stem)).await {
                tracing::debug!(error = %e, stem = %stem, "evicted entry already gone");
            }
            tracing::debug!(stem = %stem, "evicted cache entry for size bound");
        }
    }
}

async fn scan(dir: &Path) -> PilotResult<HashMap<String, EntryMeta>> {
    let mut state = HashMap::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }
        // Parse to validate; any undecodable file marks the store corrupt.
        let content = tokio::fs::read_to_string(&path).await?;
        let stored: StoredEntry = serde_json::from_str(&content)
            .map_err(|e| PilotError::Cache(format!("corrupt entry {}: {e}", path.display())))?;
        let meta = entry.metadata().await?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        if stem != sha256_hex(&stored.key) {
            return Err(PilotError::Cache(format!(
                "entry {} does not match its key",
                path.display()
            )));
        }
        state.insert(
            stem,
            EntryMeta {
                size: meta.len(),
                last_access_ms: stored.stored_at_ms,
            },
        );
    }
    Ok(state)
}

#[async_trait]
impl DecisionCache for DiskCache {
    async fn get(&self, key: &str) -> PilotResult<Option<CachedDecision>> {
        let stem = sha256_hex(key);
        let mut state = self.state.lock().await;
        if !state.contains_key(&stem) {
            return Ok(None);
        }
        let path = self.entry_path(&stem);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "cache entry unreadable, dropping");
                state.remove(&stem);
                return Ok(None);
            }
        };
        match serde_json::from_str::<StoredEntry>(&content) {
            Ok(stored) if stored.key == key => {
                if let Some(meta) = state.get_mut(&stem) {
                    meta.last_access_ms = Utc::now().timestamp_millis();
                }
                Ok(Some(stored.decision))
            }
            Ok(_) | Err(_) => {
                tracing::warn!(key = %key, "cache entry corrupt, dropping");
                state.remove(&stem);
                let _ = tokio::fs::remove_file(&path).await;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: CachedDecision) -> PilotResult<()> {
        let stem = sha256_hex(key);
        let stored = StoredEntry {
            key: key.to_string(),
            stored_at_ms: Utc::now().timestamp_millis(),
            decision: value,
        };
        let content = serde_json::to_string(&stored)?;
        let mut state = self.state.lock().await;
        tokio::fs::write(self.entry_path(&stem), &content).await?;
        state.insert(
            stem.clone(),
            EntryMeta {
                size: content.len() as u64,
                last_access_ms: stored.stored_at_ms,
            },
        );
        self.evict_to_fit(&mut state, &stem).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> PilotResult<()> {
        let stem = sha256_hex(key);
        let mut state = self.state.lock().await;
        state.remove(&stem);
        match tokio::fs::remove_file(self.entry_path(&stem)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::actions::AgentAction;
    use crate::agent::context::Step;

    fn decision(reason: &str) -> CachedDecision {
        CachedDecision {
            actions: vec![AgentAction::InputText {
                text: reason.into(),
            }],
            step: Step::new(None),
        }
    }

    #[tokio::test]
    async fn set_get_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), DEFAULT_MAX_BYTES).await.unwrap();
        cache.set("k1", decision("one")).await.unwrap();

        let got = cache.get("k1").await.unwrap().unwrap();
        assert_eq!(
            got.actions,
            vec![AgentAction::InputText { text: "one".into() }]
        );

        cache.remove("k1").await.unwrap();
        assert!(cache.get("k1").await.unwrap().is_none());
        // Removing again is not an error.
        cache.remove("k1").await.unwrap();
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = DiskCache::open(dir.path(), DEFAULT_MAX_BYTES).await.unwrap();
            cache.set("persist", decision("kept")).await.unwrap();
        }
        let reopened = DiskCache::open(dir.path(), DEFAULT_MAX_BYTES).await.unwrap();
        assert!(reopened.get("persist").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn corrupt_store_is_wiped_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("deadbeef.json"), "not json at all").unwrap();
        let cache = DiskCache::open(dir.path(), DEFAULT_MAX_BYTES).await.unwrap();
        // The garbage entry is gone and the store works.
        assert!(!dir.path().join("deadbeef.json").exists());
        cache.set("fresh", decision("ok")).await.unwrap();
        assert!(cache.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn size_bound_evicts_oldest_access() {
        let dir = tempfile::tempdir().unwrap();
        // Big enough for roughly two entries.
        let one_entry = serde_json::to_string(&StoredEntry {
            key: "sizing".into(),
            stored_at_ms: 0,
            decision: decision("x"),
        })
        .unwrap()
        .len() as u64;
        let cache = DiskCache::open(dir.path(), one_entry * 2 + 10).await.unwrap();

        cache.set("a", decision("x")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache.set("b", decision("x")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache.get("a").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache.set("c", decision("x")).await.unwrap();

        // "b" had the oldest access time.
        assert!(cache.get("b").await.unwrap().is_none());
        assert!(cache.get("a").await.unwrap().is_some());
        assert!(cache.get("c").await.unwrap().is_some());
    }
}
