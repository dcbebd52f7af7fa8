// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Default in-process compilation cache
//!
//! Least-recently-used eviction bounded by entry count and by the estimated
//! total size of the cached values. Values are handed out as clones of
//! shared handles, so eviction never invalidates a value a caller holds.

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use super::identity::ExpressionIdentity;
use crate::config::CacheConfig;
use crate::core::MemoryFootprint;

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of cached entries
    pub size: usize,
    /// Estimated bytes held by the cached entries
    pub calculated_size: usize,
    pub max_entries: Option<usize>,
    pub max_size_bytes: Option<usize>,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry<V> {
    value: V,
    size: usize,
}

struct Inner<V> {
    entries: LruCache<ExpressionIdentity, Entry<V>>,
    calculated_size: usize,
    stats: CacheStats,
}

/// LRU cache keyed by [`ExpressionIdentity`]
pub struct BoundedCache<V> {
    inner: Mutex<Inner<V>>,
    max_entries: Option<usize>,
    max_size_bytes: Option<usize>,
}

impl<V: Clone + MemoryFootprint> BoundedCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_limits(config.max_entries, config.max_size_bytes)
    }

    /// Cache bounded by entry count and/or estimated total size; `None`
    /// leaves that dimension unbounded
    pub fn with_limits(max_entries: Option<usize>, max_size_bytes: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                calculated_size: 0,
                stats: CacheStats::default(),
            }),
            max_entries,
            max_size_bytes,
        }
    }

    /// Look up an entry, marking it most recently used
    pub fn get(&self, identity: &ExpressionIdentity) -> Option<V> {
        let mut inner = self.inner.lock();
        match inner.entries.get(identity).map(|entry| entry.value.clone()) {
            Some(value) => {
                inner.stats.hits += 1;
                Some(value)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Look up an entry without touching recency or the hit counters
    pub fn peek(&self, identity: &ExpressionIdentity) -> Option<V> {
        self.inner
            .lock()
            .entries
            .peek(identity)
            .map(|entry| entry.value.clone())
    }

    /// Insert or replace an entry, evicting least recently used entries
    /// until it fits. An entry larger than the whole size bound is not
    /// stored.
    pub fn set(&self, identity: ExpressionIdentity, value: V) {
        let size = identity.estimated_size() + value.estimated_size();
        if self.max_size_bytes.is_some_and(|max| size > max) || self.max_entries == Some(0) {
            log::debug!("not caching {}: {} bytes exceed the cache size bound", identity, size);
            return;
        }

        let mut inner = self.inner.lock();
        if let Some(previous) = inner.entries.pop(&identity) {
            inner.calculated_size -= previous.size;
        }
        while self.must_evict(&inner, size) {
            let Some((evicted, entry)) = inner.entries.pop_lru() else {
                break;
            };
            inner.calculated_size -= entry.size;
            inner.stats.evictions += 1;
            log::trace!("evicted {}", evicted);
        }
        inner.entries.put(identity, Entry { value, size });
        inner.calculated_size += size;
        inner.stats.insertions += 1;
    }

    fn must_evict(&self, inner: &Inner<V>, incoming: usize) -> bool {
        let over_count = self
            .max_entries
            .is_some_and(|max| inner.entries.len() >= max);
        let over_size = self
            .max_size_bytes
            .is_some_and(|max| inner.calculated_size + incoming > max);
        over_count || over_size
    }

    pub fn contains(&self, identity: &ExpressionIdentity) -> bool {
        self.inner.lock().entries.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.entries.len(),
            calculated_size: inner.calculated_size,
            max_entries: self.max_entries,
            max_size_bytes: self.max_size_bytes,
            ..inner.stats
        }
    }

    /// Remove every entry and reset the counters
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.calculated_size = 0;
        inner.stats = CacheStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::build_identity;

    fn key(source: &str) -> ExpressionIdentity {
        build_identity(source, false, None)
    }

    #[test]
    fn test_get_and_replace() {
        let cache = BoundedCache::with_limits(Some(10), None);
        assert_eq!(cache.get(&key("a")), None);
        cache.set(key("a"), "first".to_string());
        cache.set(key("a"), "second".to_string());
        assert_eq!(cache.get(&key("a")), Some("second".to_string()));

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_peek_is_not_counted() {
        let cache = BoundedCache::with_limits(Some(10), None);
        assert_eq!(cache.peek(&key("a")), None);
        cache.set(key("a"), "value".to_string());
        assert_eq!(cache.peek(&key("a")), Some("value".to_string()));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (0, 0));
    }

    #[test]
    fn test_entry_bound_evicts_least_recently_used() {
        let cache = BoundedCache::with_limits(Some(3), None);
        for source in ["a", "b", "c"] {
            cache.set(key(source), source.to_string());
        }
        // touch "a" so "b" becomes the oldest
        assert!(cache.get(&key("a")).is_some());
        cache.set(key("d"), "d".to_string());

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&key("b")));
        assert!(cache.contains(&key("a")));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_never_exceeds_max_entries() {
        let cache = BoundedCache::with_limits(Some(5), None);
        for i in 0..50 {
            cache.set(key(&i.to_string()), i.to_string());
            assert!(cache.len() <= 5);
        }
    }

    #[test]
    fn test_size_bound() {
        let value = "x".repeat(1000);
        let entry_size = key("0").estimated_size() + value.estimated_size();
        let cache = BoundedCache::with_limits(None, Some(entry_size * 3));
        for i in 0..10 {
            cache.set(key(&i.to_string()), value.clone());
        }
        let stats = cache.stats();
        assert!(stats.calculated_size <= entry_size * 3);
        assert_eq!(stats.size, 3);
    }

    #[test]
    fn test_oversized_entry_is_skipped() {
        let cache = BoundedCache::with_limits(None, Some(64));
        cache.set(key("big"), "y".repeat(4096));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = BoundedCache::with_limits(Some(2), None);
        cache.set(key("a"), "a".to_string());
        cache.clear();
        assert_eq!(cache.stats(), CacheStats {
            max_entries: Some(2),
            ..CacheStats::default()
        });
    }
}
