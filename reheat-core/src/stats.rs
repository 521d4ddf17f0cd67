use std::sync::atomic::{AtomicU64, Ordering};

/// Read-path statistics of one cache: hits, misses, and how many hits found
/// the entry inside its preload window and triggered a refresh.
///
/// All counters use atomic operations with `Relaxed` ordering.
///
/// # Examples
///
/// ```
/// use reheat_core::CacheStats;
///
/// let stats = CacheStats::new();
///
/// stats.record_hit();
/// stats.record_hit();
/// stats.record_miss();
/// stats.record_refresh_trigger();
///
/// assert_eq!(stats.hits(), 2);
/// assert_eq!(stats.misses(), 1);
/// assert_eq!(stats.refresh_triggers(), 1);
/// assert!((stats.hit_rate() - 0.6666).abs() < 0.001);
/// ```
#[derive(Debug)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    refresh_triggers: AtomicU64,
}

impl CacheStats {
    /// Creates a new statistics tracker with all counters at zero.
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            refresh_triggers: AtomicU64::new(0),
        }
    }

    /// Records a read that found an entry.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a read that found nothing.
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a hit whose remaining TTL was inside the preload window.
    #[inline]
    pub fn record_refresh_trigger(&self) {
        self.refresh_triggers.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of hits.
    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns the number of misses.
    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns the number of hits that scheduled a refresh.
    #[inline]
    pub fn refresh_triggers(&self) -> u64 {
        self.refresh_triggers.load(Ordering::Relaxed)
    }

    /// Returns the total number of reads (hits + misses).
    #[inline]
    pub fn total_accesses(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Calculates the hit rate as a fraction (0.0 to 1.0).
    ///
    /// Returns 0.0 if there have been no reads.
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    /// Calculates the miss rate as a fraction (0.0 to 1.0).
    #[inline]
    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.refresh_triggers.store(0, Ordering::Relaxed);
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CacheStats {
    fn clone(&self) -> Self {
        Self {
            hits: AtomicU64::new(self.hits()),
            misses: AtomicU64::new(self.misses()),
            refresh_triggers: AtomicU64::new(self.refresh_triggers()),
        }
    }
}
