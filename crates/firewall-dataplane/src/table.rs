//! Striped Concurrent Hash Table
//!
//! Closed-addressing hash table keyed by `i32` with lock striping and
//! cooperative doubling.
//!
//! # Design
//!
//! - A fixed array of reader-writer locks (stripes), never resized
//! - A bucket array whose length is always a multiple of the stripe count,
//!   so every bucket belongs to exactly one stripe: `bucket mod stripes`
//! - Each stripe owns its buckets, so a stripe lock protects real data
//!   instead of a shared raw array
//! - Resize takes every stripe write lock in ascending order, re-checks the
//!   capacity it observed before locking, then doubles and rehashes

use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Serial associative list holding one bucket's entries
#[derive(Debug, Clone)]
struct Bucket<V> {
    entries: Vec<(i32, V)>,
}

impl<V> Bucket<V> {
    const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    #[inline]
    fn get(&self, key: i32) -> Option<&V> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Insert or replace; returns true if the key was new
    #[inline]
    fn upsert(&mut self, key: i32, value: V) -> bool {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => {
                slot.1 = value;
                false
            }
            None => {
                self.entries.push((key, value));
                true
            }
        }
    }

    #[inline]
    fn remove(&mut self, key: i32) -> bool {
        match self.entries.iter().position(|(k, _)| *k == key) {
            Some(idx) => {
                self.entries.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Buckets `stripe, stripe + S, stripe + 2S, ...` of the global bucket array
#[derive(Debug)]
struct Stripe<V> {
    buckets: Vec<Bucket<V>>,
}

impl<V> Stripe<V> {
    fn with_buckets(count: usize) -> Self {
        Self {
            buckets: (0..count).map(|_| Bucket::new()).collect(),
        }
    }
}

/// Lock-striped hash table
///
/// # Locking
/// - `get` / `contains`: read lock on the key's stripe
/// - `add` / `remove`: write lock on the key's stripe
/// - resize: every stripe's write lock, ascending
pub struct StripedHashTable<V> {
    stripes: Box<[RwLock<Stripe<V>>]>,
    /// Global bucket count; only changes while every stripe is write-locked
    capacity: AtomicUsize,
    max_bucket_size: usize,
    len: AtomicUsize,
}

impl<V: Clone> StripedHashTable<V> {
    /// Create a table with `capacity` buckets guarded by `capacity` stripes
    pub fn new(capacity: usize, max_bucket_size: usize) -> Self {
        Self::with_stripes(capacity, capacity, max_bucket_size)
    }

    /// Create a table with an explicit stripe count.
    ///
    /// `capacity` is rounded up to a multiple of `stripes`.
    ///
    /// # Panics
    ///
    /// Panics if `stripes` is zero.
    pub fn with_stripes(capacity: usize, stripes: usize, max_bucket_size: usize) -> Self {
        assert!(stripes > 0, "stripe count must be non-zero");
        let per_stripe = capacity.div_ceil(stripes).max(1);

        Self {
            stripes: (0..stripes)
                .map(|_| RwLock::new(Stripe::with_buckets(per_stripe)))
                .collect(),
            capacity: AtomicUsize::new(per_stripe * stripes),
            max_bucket_size,
            len: AtomicUsize::new(0),
        }
    }

    #[inline(always)]
    fn stripe_index(&self, key: i32) -> usize {
        key.rem_euclid(self.stripes.len() as i32) as usize
    }

    /// Position of `key` inside its stripe for a given global capacity
    #[inline(always)]
    fn slot(&self, key: i32, capacity: usize) -> usize {
        // i64 keeps the remainder exact for capacities beyond i32::MAX
        let bucket = (key as i64).rem_euclid(capacity as i64) as usize;
        bucket / self.stripes.len()
    }

    /// Insert or replace the value stored under `key`
    pub fn add(&self, key: i32, value: V) {
        self.resize_if_necessary(key);

        let mut stripe = self.stripes[self.stripe_index(key)].write();
        let slot = self.slot(key, self.capacity.load(Ordering::Acquire));
        if stripe.buckets[slot].upsert(key, value) {
            self.len.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove `key`; returns whether it was present
    pub fn remove(&self, key: i32) -> bool {
        self.resize_if_necessary(key);

        let mut stripe = self.stripes[self.stripe_index(key)].write();
        let slot = self.slot(key, self.capacity.load(Ordering::Acquire));
        let removed = stripe.buckets[slot].remove(key);
        if removed {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Check if `key` is present
    pub fn contains(&self, key: i32) -> bool {
        let stripe = self.stripes[self.stripe_index(key)].read();
        let slot = self.slot(key, self.capacity.load(Ordering::Acquire));
        stripe.buckets[slot].get(key).is_some()
    }

    /// Value stored under `key`, or `None` if absent
    #[inline]
    pub fn get(&self, key: i32) -> Option<V> {
        let stripe = self.stripes[self.stripe_index(key)].read();
        let slot = self.slot(key, self.capacity.load(Ordering::Acquire));
        stripe.buckets[slot].get(key).cloned()
    }

    /// Return the value under `key`, inserting `make()` first if absent.
    ///
    /// Check and insert happen under one write lock, so racing callers
    /// all observe the same value.
    pub fn get_or_insert_with<F>(&self, key: i32, make: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(key) {
            return value;
        }
        self.resize_if_necessary(key);

        let mut stripe = self.stripes[self.stripe_index(key)].write();
        let slot = self.slot(key, self.capacity.load(Ordering::Acquire));
        let bucket = &mut stripe.buckets[slot];
        if let Some(value) = bucket.get(key) {
            return value.clone();
        }
        let value = make();
        bucket.upsert(key, value.clone());
        self.len.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Resize policy: the capacity at which the bucket holding `key` was seen
    /// to exceed `max_bucket_size`, or `None` if it is within bounds
    pub fn policy(&self, key: i32) -> Option<usize> {
        let stripe = self.stripes[self.stripe_index(key)].read();
        let capacity = self.capacity.load(Ordering::Acquire);
        let slot = self.slot(key, capacity);
        (stripe.buckets[slot].len() > self.max_bucket_size).then_some(capacity)
    }

    fn resize_if_necessary(&self, key: i32) {
        if let Some(observed) = self.policy(key) {
            self.resize_from(observed);
        }
    }

    /// Double the bucket array
    pub fn resize(&self) {
        self.resize_from(self.capacity.load(Ordering::Acquire));
    }

    /// Double the bucket array if it still has `observed` buckets once the
    /// barrier is held; otherwise another thread got there first and this
    /// is a no-op. Returns whether this call resized.
    pub fn resize_from(&self, observed: usize) -> bool {
        // Ascending order; every other path holds at most one stripe lock
        let mut guards: Vec<_> = self.stripes.iter().map(|s| s.write()).collect();

        if self.capacity.load(Ordering::Acquire) != observed {
            return false;
        }

        let capacity = observed * 2;
        let per_stripe = capacity / self.stripes.len();

        // bucket mod stripes is unchanged by doubling, so entries never
        // migrate between stripes
        for guard in guards.iter_mut() {
            let old = std::mem::replace(&mut **guard, Stripe::with_buckets(per_stripe));
            for bucket in old.buckets {
                for (key, value) in bucket.entries {
                    let slot = self.slot(key, capacity);
                    guard.buckets[slot].entries.push((key, value));
                }
            }
        }

        self.capacity.store(capacity, Ordering::Release);
        tracing::debug!(from = observed, to = capacity, "striped table resized");
        true
    }

    /// Global bucket count
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Lock count (fixed at construction)
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_add_get_remove() {
        let table = StripedHashTable::new(4, 8);

        table.add(1, "one");
        table.add(-7, "minus seven");
        assert_eq!(table.get(1), Some("one"));
        assert_eq!(table.get(-7), Some("minus seven"));
        assert!(table.contains(1));
        assert_eq!(table.len(), 2);

        table.add(1, "uno");
        assert_eq!(table.get(1), Some("uno"));
        assert_eq!(table.len(), 2);

        assert!(table.remove(1));
        assert!(!table.remove(1));
        assert!(!table.contains(1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_absent_is_distinct_from_false() {
        let table = StripedHashTable::new(4, 4);
        table.add(3, false);

        assert_eq!(table.get(3), Some(false));
        assert_eq!(table.get(4), None);
    }

    #[test]
    fn test_resize_doubles_and_keeps_entries() {
        let table = StripedHashTable::new(4, 8);
        for i in 0..256 {
            table.add(i, i * i);
        }

        assert!(table.capacity() > 4);
        assert_eq!(table.capacity() % table.stripe_count(), 0);
        assert_eq!(table.stripe_count(), 4);
        for i in 0..256 {
            assert_eq!(table.get(i), Some(i * i));
        }
        assert_eq!(table.len(), 256);
    }

    #[test]
    fn test_explicit_resize_rehashes() {
        let table = StripedHashTable::with_stripes(8, 2, 100);
        for i in -50..50 {
            table.add(i, i);
        }
        assert_eq!(table.capacity(), 8);

        table.resize();
        assert_eq!(table.capacity(), 16);
        for i in -50..50 {
            assert_eq!(table.get(i), Some(i));
        }
    }

    #[test]
    fn test_stale_policy_verdict_does_not_resize() {
        let table = StripedHashTable::with_stripes(4, 2, 1);
        for i in [0, 4] {
            table.add(i, i);
        }
        let observed = table.policy(0).unwrap();
        assert_eq!(observed, 4);

        // Another thread doubles first
        assert!(table.resize_from(observed));
        assert_eq!(table.capacity(), 8);

        // The verdict taken at capacity 4 is now stale
        assert!(!table.resize_from(observed));
        assert_eq!(table.capacity(), 8);
        assert_eq!(table.policy(0), None);
    }

    #[test]
    fn test_racing_resizes_double_once() {
        let table = Arc::new(StripedHashTable::<i32>::with_stripes(8, 4, 4));
        let observed = table.capacity();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || table.resize_from(observed))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(table.capacity(), 16);
    }

    #[test]
    fn test_capacity_rounded_to_stripe_multiple() {
        let table: StripedHashTable<u8> = StripedHashTable::with_stripes(10, 4, 5);
        assert_eq!(table.capacity(), 12);
    }

    #[test]
    fn test_get_or_insert_with_single_winner() {
        let table = Arc::new(StripedHashTable::new(4, 4));
        let mut handles = Vec::new();

        for t in 0..8u32 {
            let table = table.clone();
            handles.push(thread::spawn(move || {
                (0..100).map(|k| table.get_or_insert_with(k, || Arc::new(t))).collect::<Vec<_>>()
            }));
        }

        let seen: Vec<Vec<Arc<u32>>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for k in 0..100usize {
            let first = &seen[0][k];
            assert!(seen.iter().all(|v| Arc::ptr_eq(&v[k], first)));
        }
        assert_eq!(table.len(), 100);
    }

    #[test]
    fn test_concurrent_ops_across_resizes() {
        let table = Arc::new(StripedHashTable::new(2, 2));
        let mut handles = Vec::new();

        for t in 0..4i32 {
            let table = table.clone();
            handles.push(thread::spawn(move || {
                let base = t * 10_000;
                for i in 0..2_000 {
                    table.add(base + i, base + i);
                    assert_eq!(table.get(base + i), Some(base + i));
                    // Remove every third key again
                    if i % 3 == 0 {
                        assert!(table.remove(base + i));
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        for t in 0..4i32 {
            let base = t * 10_000;
            for i in 0..2_000 {
                assert_eq!(table.contains(base + i), i % 3 != 0, "key {}", base + i);
            }
        }
        assert!(table.capacity() > 2);
        assert_eq!(table.capacity() % table.stripe_count(), 0);
    }

    #[test]
    fn test_shared_key_churn_across_resizes() {
        const KEYS: i32 = 3_000;
        let table = Arc::new(StripedHashTable::with_stripes(4, 4, 1));
        let mut handles = Vec::new();

        for t in 0..8i32 {
            let table = table.clone();
            handles.push(thread::spawn(move || {
                for round in 0..4 {
                    for k in 0..KEYS {
                        match (k + t + round) % 3 {
                            0 => table.add(k, k),
                            1 => {
                                table.remove(k);
                            }
                            _ => {
                                if let Some(v) = table.get(k) {
                                    assert_eq!(v, k);
                                }
                            }
                        }
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let present = (0..KEYS).filter(|&k| table.contains(k)).count();
        assert_eq!(table.len(), present);
        for k in (0..KEYS).filter(|&k| table.contains(k)) {
            assert_eq!(table.get(k), Some(k));
        }
        assert!(table.capacity() > 4);
        assert_eq!(table.capacity() % table.stripe_count(), 0);
    }
}
