use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use tracing::debug;

use super::RangeCache;

/// File name -> cache mapping shared by every session of one server.
///
/// At most one cache exists per live file name. Caches are created lazily and
/// only torn down when their file leaves the data directory.
#[derive(Debug)]
pub struct CacheRegistry {
    capacity: NonZeroUsize,
    caches: RwLock<HashMap<String, Arc<RangeCache>>>,
}

impl CacheRegistry {
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| anyhow!("cache capacity must be greater than zero"))?;
        Ok(Self { capacity, caches: RwLock::new(HashMap::new()) })
    }

    pub fn capacity(&self) -> usize { self.capacity.get() }

    /// Existing cache for `name`, or a freshly registered one.
    pub fn get_or_create(&self, name: &str) -> Arc<RangeCache> {
        // fast path read
        if let Some(c) = self.caches.read().get(name).cloned() { return c; }
        let mut w = self.caches.write();
        // another session may have won the race between the two locks
        w.entry(name.to_string())
            .or_insert_with(|| {
                debug!(target: "nfstore::cache", file = %name, capacity = self.capacity.get(), "cache created");
                Arc::new(RangeCache::new(name, self.capacity))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<RangeCache>> { self.caches.read().get(name).cloned() }

    /// Clear the cache for `name` if one exists. Returns whether it existed.
    pub fn invalidate(&self, name: &str) -> bool {
        let r = self.caches.read();
        match r.get(name) {
            Some(c) => { c.clear(); true }
            None => false,
        }
    }

    /// Tear down and unregister the cache of a file that left the data directory.
    pub fn remove(&self, name: &str) -> bool {
        let mut w = self.caches.write();
        match w.remove(name) {
            Some(c) => {
                // sessions still holding the Arc must not keep serving its entries
                c.clear();
                debug!(target: "nfstore::cache", file = %name, "cache removed");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize { self.caches.read().len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn names(&self) -> Vec<String> {
        let mut v: Vec<String> = self.caches.read().keys().cloned().collect();
        v.sort();
        v
    }
}
