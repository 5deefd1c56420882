use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use super::CacheKey;

/// Counters for one file's cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub clears: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    clears: AtomicU64,
}

/// Bounded LRU cache of READ results for a single file.
///
/// All operations take the cache's own lock, so readers of different files
/// never contend. Values are copied out on lookup; callers never see the
/// stored buffer.
#[derive(Debug)]
pub struct RangeCache {
    file: String,
    inner: Mutex<Inner>,
    counters: Counters,
}

#[derive(Debug)]
struct Inner {
    lru: LruCache<CacheKey, Vec<u8>>,
    /// Bumped by every clear; a fill started under an older generation is stale.
    generation: u64,
}

impl RangeCache {
    pub fn new(file: impl Into<String>, capacity: NonZeroUsize) -> Self {
        let inner = Inner { lru: LruCache::new(capacity), generation: 0 };
        Self { file: file.into(), inner: Mutex::new(inner), counters: Counters::default() }
    }

    pub fn file(&self) -> &str { &self.file }

    /// Look up a range, promoting it to most-recently-used on a hit.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let hit = self.inner.lock().lru.get(key).cloned();
        match &hit {
            Some(_) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(target: "nfstore::cache", file = %self.file, off = key.offset, len = key.len, "cache hit");
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(target: "nfstore::cache", file = %self.file, off = key.offset, len = key.len, "cache miss");
            }
        }
        hit
    }

    /// Insert or overwrite a range as most-recently-used, evicting the
    /// least-recently-used entry when over capacity.
    pub fn put(&self, key: CacheKey, bytes: Vec<u8>) {
        let displaced = self.inner.lock().lru.push(key, bytes);
        self.record_put(key, displaced);
    }

    /// Like [`put`](Self::put) but only if no clear happened since
    /// `generation` was observed. Returns whether the entry was stored.
    pub fn put_if_current(&self, key: CacheKey, bytes: Vec<u8>, generation: u64) -> bool {
        let displaced = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                debug!(target: "nfstore::cache", file = %self.file, off = key.offset, len = key.len, "stale fill dropped");
                return false;
            }
            inner.lru.push(key, bytes)
        };
        self.record_put(key, displaced);
        true
    }

    /// Current clear generation, to be passed back to [`put_if_current`](Self::put_if_current).
    pub fn generation(&self) -> u64 { self.inner.lock().generation }

    fn record_put(&self, key: CacheKey, displaced: Option<(CacheKey, Vec<u8>)>) {
        match displaced {
            Some((old, _)) if old == key => {
                debug!(target: "nfstore::cache", file = %self.file, off = key.offset, len = key.len, "cache update");
            }
            Some((victim, _)) => {
                self.counters.inserts.fetch_add(1, Ordering::Relaxed);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(target: "nfstore::cache", file = %self.file, off = victim.offset, len = victim.len, "cache evict");
            }
            None => {
                self.counters.inserts.fetch_add(1, Ordering::Relaxed);
                debug!(target: "nfstore::cache", file = %self.file, off = key.offset, len = key.len, "cache insert");
            }
        }
    }

    /// Drop every entry. Used on each write to the owning file.
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock();
            inner.lru.clear();
            inner.generation += 1;
        }
        self.counters.clears.fetch_add(1, Ordering::Relaxed);
        debug!(target: "nfstore::cache", file = %self.file, "cache clear");
    }

    pub fn contains(&self, key: &CacheKey) -> bool { self.inner.lock().lru.contains(key) }
    pub fn len(&self) -> usize { self.inner.lock().lru.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    pub fn capacity(&self) -> usize { self.inner.lock().lru.cap().get() }

    /// Keys from most- to least-recently-used.
    pub fn keys_by_recency(&self) -> Vec<CacheKey> {
        self.inner.lock().lru.iter().map(|(k, _)| *k).collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            clears: self.counters.clears.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(cap: usize) -> RangeCache { RangeCache::new("f", NonZeroUsize::new(cap).unwrap()) }
    fn k(off: u64, len: u64) -> CacheKey { CacheKey::new(off, len) }

    #[test]
    fn get_returns_copy_and_counts() {
        let c = cache(4);
        assert_eq!(c.get(&k(0, 4)), None);
        c.put(k(0, 4), b"NETA".to_vec());
        let mut got = c.get(&k(0, 4)).unwrap();
        got[0] = b'X';
        assert_eq!(c.get(&k(0, 4)).unwrap(), b"NETA");
        let s = c.stats();
        assert_eq!((s.hits, s.misses, s.inserts), (2, 1, 1));
    }

    #[test]
    fn same_offset_different_length_are_distinct() {
        let c = cache(4);
        c.put(k(0, 4), b"abcd".to_vec());
        c.put(k(0, 2), b"ab".to_vec());
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(&k(0, 2)).unwrap(), b"ab");
        assert_eq!(c.get(&k(0, 4)).unwrap(), b"abcd");
    }

    #[test]
    fn evicts_least_recently_used() {
        let c = cache(3);
        c.put(k(0, 1), vec![0]);
        c.put(k(1, 1), vec![1]);
        c.put(k(2, 1), vec![2]);
        c.put(k(3, 1), vec![3]);
        assert_eq!(c.len(), 3);
        assert!(!c.contains(&k(0, 1)));
        assert_eq!(c.stats().evictions, 1);
        assert_eq!(c.keys_by_recency(), vec![k(3, 1), k(2, 1), k(1, 1)]);
    }

    #[test]
    fn get_protects_from_eviction() {
        let c = cache(3);
        c.put(k(0, 1), vec![0]);
        c.put(k(1, 1), vec![1]);
        c.put(k(2, 1), vec![2]);
        assert!(c.get(&k(0, 1)).is_some());
        c.put(k(3, 1), vec![3]);
        assert!(c.contains(&k(0, 1)));
        assert!(!c.contains(&k(1, 1)));
    }

    #[test]
    fn put_existing_overwrites_and_promotes() {
        let c = cache(2);
        c.put(k(0, 1), vec![0]);
        c.put(k(1, 1), vec![1]);
        c.put(k(0, 1), vec![9]);
        assert_eq!(c.len(), 2);
        assert_eq!(c.stats().evictions, 0);
        c.put(k(2, 1), vec![2]);
        assert!(!c.contains(&k(1, 1)));
        assert_eq!(c.get(&k(0, 1)).unwrap(), vec![9]);
    }

    #[test]
    fn clear_empties_but_keeps_capacity() {
        let c = cache(2);
        c.put(k(0, 1), vec![0]);
        c.clear();
        assert!(c.is_empty());
        assert_eq!(c.capacity(), 2);
        assert_eq!(c.stats().clears, 1);
    }

    #[test]
    fn fill_from_before_a_clear_is_dropped() {
        let c = cache(2);
        let gen = c.generation();
        c.clear();
        assert!(!c.put_if_current(k(0, 4), b"old!".to_vec(), gen));
        assert!(c.is_empty());
        assert!(c.put_if_current(k(0, 4), b"new!".to_vec(), c.generation()));
        assert_eq!(c.get(&k(0, 4)).unwrap(), b"new!");
    }
}
