//! Bounded byte-buffer store with LRU eviction and single-flight
//! materialization.

use std::{
    io,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use lru::LruCache;
use tracing::warn;

/// Concurrent map from string key to byte buffer.
///
/// Accounting uses each buffer's *allocated capacity*, not its length, so
/// the reported size reflects the memory actually retained. A non-positive
/// ceiling disables eviction entirely (the permanent tier).
///
/// An entry larger than the ceiling is still admitted: it displaces every
/// other entry and remains alone with `size() > ceiling`. Eviction never
/// removes the last remaining entry.
pub struct ByteCache {
    inner: RwLock<Inner>,
}

struct Inner {
    entries: LruCache<String, Arc<Vec<u8>>>,
    size: i64,
    max_size: i64,
}

impl ByteCache {
    pub fn new(max_size: i64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: LruCache::unbounded(),
                size: 0,
                max_size,
            }),
        }
    }

    /// Insert or replace `key`, promote it to most-recently-used, then
    /// evict least-recently-used entries until the ceiling holds.
    pub fn store(&self, key: &str, value: Vec<u8>) {
        let mut inner = self.lock_exclusive("store");
        inner.insert(key.to_string(), Arc::new(value));
    }

    /// Look up `key`, promoting it to most-recently-used on a hit.
    pub fn load(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let mut inner = self.lock_exclusive("load");
        inner.entries.get(key).cloned()
    }

    /// Return the cached buffer for `key`, or run `produce` to materialize
    /// it.
    ///
    /// The producer runs while the exclusive lock is held: at most one
    /// producer is in flight per cache, and concurrent misses for the same
    /// key observe the first result instead of recomputing it. A producer
    /// error is returned to the caller only; nothing is stored, so the next
    /// lookup re-attempts.
    pub fn get<F>(&self, key: &str, produce: F) -> io::Result<Arc<Vec<u8>>>
    where
        F: FnOnce() -> io::Result<Vec<u8>>,
    {
        if let Some(hit) = self.load(key) {
            return Ok(hit);
        }

        let mut inner = self.lock_exclusive("get");
        // A concurrent miss may have materialized the entry while we were
        // waiting for the lock.
        if let Some(existing) = inner.entries.get(key) {
            return Ok(existing.clone());
        }

        let value = Arc::new(produce()?);
        inner.insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// Sum of the capacities of all live entries.
    pub fn size(&self) -> i64 {
        self.lock_shared("size").size
    }

    /// Whether `key` is present, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.lock_shared("contains").entries.peek(key).is_some()
    }

    fn lock_shared(&self, op: &'static str) -> RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    target: "angolo::cache",
                    op,
                    "byte cache lock poisoned by a panicked producer; serving the surviving entries"
                );
                poisoned.into_inner()
            }
        }
    }

    fn lock_exclusive(&self, op: &'static str) -> RwLockWriteGuard<'_, Inner> {
        // Producers run under this lock; one that panics poisons it. Entries
        // already stored are still intact, so recover rather than propagate.
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    target: "angolo::cache",
                    op,
                    "byte cache lock poisoned by a panicked producer; serving the surviving entries"
                );
                poisoned.into_inner()
            }
        }
    }
}

impl Inner {
    fn insert(&mut self, key: String, value: Arc<Vec<u8>>) {
        let incoming = value.capacity() as i64;
        if let Some(existing) = self.entries.get_mut(&key) {
            self.size += incoming - existing.capacity() as i64;
            *existing = value;
        } else {
            self.entries.push(key, value);
            self.size += incoming;
        }
        self.evict_least_recent();
    }

    fn evict_least_recent(&mut self) {
        if self.max_size <= 0 {
            return;
        }
        while self.size > self.max_size && self.entries.len() > 1 {
            let Some((_, evicted)) = self.entries.pop_lru() else {
                break;
            };
            self.size -= evicted.capacity() as i64;
        }
    }
}
