//! Cache backend traits and statistics.
//!
//! This module defines what the read-write strategy needs from the cache it
//! sits in front of. The backend stores opaque [`Lockable`] payloads; it
//! knows nothing about soft-lock semantics.

use softlock_core::{CacheKey, Lockable, SoftlockResult, Timestamp};

/// Cache backend trait for pluggable cache implementations.
///
/// Implementations must be thread-safe. `lock`/`unlock` provide per-key
/// mutual exclusion that, for distributed backends, spans every node sharing
/// the cache; `next_timestamp` must be monotonic across those same nodes.
pub trait CacheBackend<V, Ver>: Send + Sync {
    /// Read the slot stored under `key`.
    fn get(&self, key: &CacheKey) -> SoftlockResult<Option<Lockable<V, Ver>>>;

    /// Replace the slot stored under `key`. Clustered backends replicate
    /// this write to every node.
    fn put(&self, key: &CacheKey, value: Lockable<V, Ver>) -> SoftlockResult<()>;

    /// Drop the slot stored under `key`, if any.
    fn remove(&self, key: &CacheKey) -> SoftlockResult<()>;

    /// Drop every slot.
    fn clear(&self) -> SoftlockResult<()>;

    /// Block until this node holds the exclusive lock on `key`.
    fn lock(&self, key: &CacheKey) -> SoftlockResult<()>;

    /// Give up the exclusive lock on `key`.
    fn unlock(&self, key: &CacheKey) -> SoftlockResult<()>;

    /// Next reading of the shared logical clock.
    fn next_timestamp(&self) -> Timestamp;

    /// Soft-lock lifetime, in clock units.
    fn timeout(&self) -> i64;

    /// Release resources held by the backend.
    fn destroy(&self) -> SoftlockResult<()>;

    /// Get cache statistics.
    fn stats(&self) -> SoftlockResult<CacheStats>;

    /// Cluster-aware operations, when the backend replicates across nodes.
    fn as_clustered(&self) -> Option<&dyn ClusteredCache<V, Ver>> {
        None
    }
}

/// Reads and writes that skip cluster replication announcements.
///
/// Lock bookkeeping goes through these: other nodes learn about soft locks
/// when they read the slot, not through an eager broadcast.
pub trait ClusteredCache<V, Ver>: Send + Sync {
    /// Read without counting as cache traffic.
    fn get_quiet(&self, key: &CacheKey) -> SoftlockResult<Option<Lockable<V, Ver>>>;

    /// Write without announcing the change to other nodes.
    fn put_quiet(&self, key: &CacheKey, value: Lockable<V, Ver>) -> SoftlockResult<()>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of entries dropped by the backend's own eviction.
    pub evictions: u64,
    /// Number of writes announced to other cluster nodes.
    pub announcements: u64,
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
