//! Run Statistics
//!
//! Lock-free counters shared by every worker of a run.

use crate::fingerprint::HISTOGRAM_BUCKETS;
use crossbeam::utils::CachePadded;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Packet accounting for one run.
///
/// Every dispatched packet ends in exactly one of `processed`, `dropped`
/// or `abandoned`; `in_flight` counts the ones that have not yet.
#[derive(Default)]
pub struct PipelineStats {
    dispatched: CachePadded<AtomicU64>,
    processed: CachePadded<AtomicU64>,
    admitted: CachePadded<AtomicU64>,
    cache_hits: CachePadded<AtomicU64>,
    cache_misses: CachePadded<AtomicU64>,
    dropped: CachePadded<AtomicU64>,
    abandoned: CachePadded<AtomicU64>,
    in_flight: CachePadded<AtomicI64>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets between dispatch and completion
    #[inline(always)]
    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Reserve budget before an enqueue attempt
    #[inline(always)]
    pub fn reserve(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// Give back a reservation whose enqueue failed
    #[inline(always)]
    pub fn unreserve(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    #[inline(always)]
    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Terminal: packet fully handled
    #[inline(always)]
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Terminal: packet discarded because of unexpected state
    #[inline(always)]
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Terminal: packet still queued or in hand at shutdown
    #[inline(always)]
    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    #[inline(always)]
    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Stats snapshot (non-atomic)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub dispatched: u64,
    pub processed: u64,
    pub admitted: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub dropped: u64,
    pub abandoned: u64,
    pub in_flight: i64,
}

impl StatsSnapshot {
    /// Whether every dispatched packet reached exactly one terminal state
    pub fn is_balanced(&self) -> bool {
        self.in_flight == 0 && self.dispatched == self.processed + self.dropped + self.abandoned
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 { return 0.0; }
        self.cache_hits as f64 / total as f64
    }
}

/// Admitted packets per fingerprint bucket
pub struct Histogram {
    buckets: Box<[AtomicU64]>,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            buckets: (0..HISTOGRAM_BUCKETS).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Count one packet; out-of-range buckets wrap
    #[inline(always)]
    pub fn record(&self, bucket: usize) {
        self.buckets[bucket % HISTOGRAM_BUCKETS].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, bucket: usize) -> u64 {
        self.buckets
            .get(bucket)
            .map_or(0, |b| b.load(Ordering::Relaxed))
    }

    /// Sum over all buckets
    pub fn total(&self) -> u64 {
        self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).sum()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Histogram")
            .field("buckets", &self.buckets.len())
            .field("total", &self.total())
            .finish()
    }
}
