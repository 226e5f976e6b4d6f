use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;

use crate::cache::{CachedDecision, DecisionCache};
use crate::errors::PilotResult;

pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct TimedEntry {
    value: CachedDecision,
    stored_at_ms: i64,
}

impl TimedEntry {
    fn is_fresh(&self, now_ms: i64, ttl: Duration) -> bool {
        now_ms - self.stored_at_ms <= ttl.as_millis() as i64
    }
}

/// In-process decision cache: LRU bounded by entry count, entries expire
/// after a TTL.
pub struct MemoryCache {
    inner: Mutex<LruCache<String, TimedEntry>>,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped above zero");
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            ttl,
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

#[async_trait]
impl DecisionCache for MemoryCache {
    async fn get(&self, key: &str) -> PilotResult<Option<CachedDecision>> {
        let now_ms = Utc::now().timestamp_millis();
        let mut inner = self.inner.lock();
        match inner.get(key) {
            Some(entry) if entry.is_fresh(now_ms, self.ttl) => Ok(Some(entry.value.clone())),
            Some(_) => {
                inner.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: CachedDecision) -> PilotResult<()> {
        self.inner.lock().put(
            key.to_string(),
            TimedEntry {
                value,
                stored_at_ms: Utc::now().timestamp_millis(),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> PilotResult<()> {
        self.inner.lock().pop(key);
        Ok(())
    }
}
