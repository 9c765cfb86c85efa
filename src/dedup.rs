//! Bounded LRU set used to suppress repeated announcements.
//!
//! The receiver caches the string form of every CID it has accepted. A
//! repeat announcement for a cached CID is dropped and the entry is
//! promoted to most-recently-used, so a CID stays suppressed for as long
//! as it keeps arriving within the recency window.

use std::num::NonZeroUsize;

use lru::LruCache;

/// Fixed-capacity set of CID strings with LRU eviction.
///
/// Not internally synchronized. The receiver accesses it under its state
/// lock, which also covers the closed flag, so a capacity of a few dozen
/// entries costs nothing measurable.
pub(crate) struct CidLru {
    cache: LruCache<String, ()>,
}

impl CidLru {
    /// Create a set holding at most `capacity` entries.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("dedup capacity must be non-zero");
        Self {
            cache: LruCache::new(capacity),
        }
    }

    /// Record `key`, returning whether it was already present.
    ///
    /// A present key is promoted to most-recently-used. An absent key is
    /// inserted, evicting the least-recently-used entry when the set is
    /// at capacity.
    pub(crate) fn update(&mut self, key: &str) -> bool {
        if self.cache.get(key).is_some() {
            return true;
        }
        self.cache.put(key.to_owned(), ());
        false
    }

    /// Remove `key`. No-op if it is not present.
    pub(crate) fn remove(&mut self, key: &str) {
        self.cache.pop(key);
    }

    /// Current number of entries.
    pub(crate) fn len(&self) -> usize {
        self.cache.len()
    }
}
