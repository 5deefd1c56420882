//!
//! nfstore read cache
//! ------------------
//! Every backing file gets its own bounded LRU cache of previously served READ
//! ranges, keyed by the exact `(offset, len)` pair of the request. Caches are
//! owned by a [`CacheRegistry`] that lives as long as the server context.
//!
//! Locking: the registry lock and each cache's lock are distinct; whenever both
//! are needed the registry lock is taken first. Neither is ever held across
//! network I/O.

mod range_cache;
mod registry;

pub use range_cache::{CacheStats, RangeCache};
pub use registry::CacheRegistry;

/// Identity of a served READ range. Equality is exact on both fields; ranges
/// that merely overlap are distinct entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub offset: u64,
    pub len: u64,
}

impl CacheKey {
    pub fn new(offset: u64, len: u64) -> Self { Self { offset, len } }
}
