//! Cache Statistics Module
//!
//! Per-process counters for reads, writes and overflow recovery. They
//! describe what this process observed, not the shared segment as a whole.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Store Stats ==
/// Live counters, updated without locking.
#[derive(Debug, Default)]
pub struct StoreStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    gc_passes: AtomicU64,
    collected: AtomicU64,
    resets: AtomicU64,
    dropped: AtomicU64,
    decode_failures: AtomicU64,
}

impl StoreStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a read that found a live value.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a read that found nothing usable.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a blob written to the segment.
    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a GC pass and the entries it removed.
    pub fn record_gc(&self, removed: usize) {
        self.gc_passes.fetch_add(1, Ordering::Relaxed);
        self.collected.fetch_add(removed as u64, Ordering::Relaxed);
    }

    /// Counts an overflow reset and the entries it discarded.
    pub fn record_reset(&self, dropped: usize) {
        self.resets.fetch_add(1, Ordering::Relaxed);
        self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    /// Counts a blob that could not be decoded.
    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the counters out.
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            gc_passes: self.gc_passes.load(Ordering::Relaxed),
            collected: self.collected.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}

// == Cache Stats ==
/// A point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads that returned a value
    pub hits: u64,
    /// Reads that returned nothing (absent or expired)
    pub misses: u64,
    /// Blobs written to the segment
    pub writes: u64,
    /// GC passes triggered by overflow
    pub gc_passes: u64,
    /// Expired entries removed by GC passes
    pub collected: u64,
    /// Segments reset because even a collected map did not fit
    pub resets: u64,
    /// Entries discarded by resets
    pub dropped: u64,
    /// Blobs that could not be decoded
    pub decode_failures: u64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
