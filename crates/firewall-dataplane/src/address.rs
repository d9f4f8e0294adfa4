//! Per-address rule state and permission cache

use crate::config::TableConfig;
use crate::interval::{BlockFlag, IntervalList};
use crate::table::StripedHashTable;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Memoized interval verdicts for one destination, keyed by source address
pub type PermissionCache = StripedHashTable<bool>;

/// Sizing of a permission cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheShape {
    /// Initial bucket count (and stripe count)
    pub initial_capacity: usize,
    /// Bucket size that triggers a resize
    pub max_bucket_size: usize,
    /// Bucket-array capacity beyond which the cache is thrown away
    pub ceiling: usize,
}

impl Default for CacheShape {
    fn default() -> Self {
        Self {
            initial_capacity: 10,
            max_bucket_size: 5,
            ceiling: 128,
        }
    }
}

impl From<&TableConfig> for CacheShape {
    fn from(config: &TableConfig) -> Self {
        Self {
            initial_capacity: config.cache_initial_capacity,
            max_bucket_size: config.cache_max_bucket_size,
            ceiling: config.cache_ceiling,
        }
    }
}

impl CacheShape {
    fn build(&self) -> PermissionCache {
        PermissionCache::new(self.initial_capacity, self.max_bucket_size)
    }
}

/// Everything the firewall knows about one address.
///
/// As a destination it owns the interval rules and the permission cache;
/// as a sender it owns the blocked flag.
pub struct AddressRecord {
    blocked: BlockFlag,
    rules: IntervalList,
    cache: ArcSwap<PermissionCache>,
    shape: CacheShape,
}

impl AddressRecord {
    /// Create a record that accepts every sender and is not blocked
    pub fn new(shape: CacheShape) -> Self {
        Self {
            blocked: BlockFlag::default(),
            rules: IntervalList::new(),
            cache: ArcSwap::from_pointee(shape.build()),
            shape,
        }
    }

    /// Apply a rule update.
    ///
    /// The cache is replaced before the interval list is touched and once
    /// more after it, so entries written by lookups that overlapped the
    /// update are discarded too.
    pub fn update_permission(&self, block_sender: bool, make_accepting: bool, begin: i32, end: i32) {
        self.clear_cache();
        if make_accepting {
            self.rules.add_interval(begin, end, &self.blocked, block_sender);
        } else {
            self.rules.remove_interval(begin, end, &self.blocked, block_sender);
        }
        self.clear_cache();
    }

    /// Cached verdict for `source` combined with the live sender flag.
    ///
    /// `None` means the cache has no entry and the rules must be consulted.
    #[inline]
    pub fn cached(&self, source: i32, sender: &AddressRecord) -> Option<bool> {
        self.cache
            .load()
            .get(source)
            .map(|admitted| admitted && !sender.is_blocked())
    }

    /// Evaluate the rules for `source`, bypassing the cache, and remember
    /// the verdict.
    pub fn resolve(&self, source: i32, sender: &AddressRecord) -> bool {
        // Write into the instance loaded before evaluating; if an update
        // swaps the cache meanwhile, this entry is dropped with the old one
        let cache = self.cache.load_full();
        let admitted = self.rules.state_at(source);
        cache.add(source, admitted);
        if cache.capacity() > self.shape.ceiling {
            self.cache.compare_and_swap(&cache, Arc::new(self.shape.build()));
        }
        admitted && !sender.is_blocked()
    }

    /// Cache first, rules on miss
    #[inline]
    pub fn lookup(&self, source: i32, sender: &AddressRecord) -> bool {
        match self.cached(source, sender) {
            Some(allowed) => allowed,
            None => self.resolve(source, sender),
        }
    }

    /// Whether `source` is admitted according to the rules alone (no cache)
    pub fn admits(&self, source: i32, sender: &AddressRecord) -> bool {
        self.rules.contains(source, &sender.blocked)
    }

    /// Replace the cache with an empty instance
    pub fn clear_cache(&self) {
        self.cache.store(Arc::new(self.shape.build()));
    }

    /// Whether this address is currently forbidden from sending
    #[inline(always)]
    pub fn is_blocked(&self) -> bool {
        self.blocked.is_blocked()
    }

    /// Entries in the current cache instance
    pub fn cache_len(&self) -> usize {
        self.cache.load().len()
    }

    /// Bucket-array capacity of the current cache instance
    pub fn cache_capacity(&self) -> usize {
        self.cache.load().capacity()
    }
}

impl Default for AddressRecord {
    fn default() -> Self {
        Self::new(CacheShape::default())
    }
}

impl std::fmt::Debug for AddressRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressRecord")
            .field("blocked", &self.is_blocked())
            .field("boundaries", &self.rules.boundary_count())
            .field("cached", &self.cache_len())
            .finish()
    }
}
