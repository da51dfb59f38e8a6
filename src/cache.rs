// src/cache.rs

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

const DEFAULT_CAPACITY: usize = 1024;
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Per-object like dictionary: comment id -> like count, plus the total.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LikeSummary {
    pub likes: HashMap<i64, i64>,
    pub total: i64,
}

struct Entry {
    stored_at: Instant,
    summary: LikeSummary,
}

/// TTL'd LRU cache for per-object like dictionaries. Opaque
/// get/set/invalidate; entries expire after `ttl` and are dropped on read.
pub struct LikeCache {
    inner: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl LikeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap())),
            ttl,
        }
    }

    pub fn object_key(content_type: &str, object_pk: &str) -> String {
        format!("likes:{}:{}", content_type, object_pk)
    }

    pub fn get(&self, key: &str) -> Option<LikeSummary> {
        let mut cache = self.inner.lock();
        match cache.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.summary.clone()),
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, summary: LikeSummary) {
        self.inner.lock().put(
            key,
            Entry {
                stored_at: Instant::now(),
                summary,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.lock().pop(key);
    }
}

impl Default for LikeCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
