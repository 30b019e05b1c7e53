//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about one cache's usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Self-user reads served from local values.
    pub hits: u64,
    /// Self-user reads that had to go remote.
    pub misses: u64,
    /// Fast-path get calls issued.
    pub fast_path_calls: u64,
    /// Fallback queries issued.
    pub fallback_queries: u64,
    /// Prefix list calls issued.
    pub list_calls: u64,
    /// Remote calls that failed.
    pub remote_errors: u64,
    /// Times local values were dropped because the generation moved.
    pub invalidations: u64,
    /// Times a tracker was torn down after a shared-array fault.
    pub tracker_errors: u64,
    /// Trackers adopted from the service.
    pub trackers_installed: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Total number of remote calls made for reads.
    pub fn remote_reads(&self) -> u64 {
        self.fast_path_calls + self.fallback_queries + self.list_calls
    }
}

/// Lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    fast_path_calls: AtomicU64,
    fallback_queries: AtomicU64,
    list_calls: AtomicU64,
    remote_errors: AtomicU64,
    invalidations: AtomicU64,
    tracker_errors: AtomicU64,
    trackers_installed: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Counter {
    Hit,
    Miss,
    FastPathCall,
    FallbackQuery,
    ListCall,
    RemoteError,
    Invalidation,
    TrackerError,
    TrackerInstalled,
}

impl StatsRecorder {
    pub(crate) fn record(&self, counter: Counter) {
        let slot = match counter {
            Counter::Hit => &self.hits,
            Counter::Miss => &self.misses,
            Counter::FastPathCall => &self.fast_path_calls,
            Counter::FallbackQuery => &self.fallback_queries,
            Counter::ListCall => &self.list_calls,
            Counter::RemoteError => &self.remote_errors,
            Counter::Invalidation => &self.invalidations,
            Counter::TrackerError => &self.tracker_errors,
            Counter::TrackerInstalled => &self.trackers_installed,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fast_path_calls: self.fast_path_calls.load(Ordering::Relaxed),
            fallback_queries: self.fallback_queries.load(Ordering::Relaxed),
            list_calls: self.list_calls.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            tracker_errors: self.tracker_errors.load(Ordering::Relaxed),
            trackers_installed: self.trackers_installed.load(Ordering::Relaxed),
        }
    }
}
