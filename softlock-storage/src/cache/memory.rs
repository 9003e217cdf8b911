//! In-memory cache backend.
//!
//! Keeps slots in a `HashMap` behind a `RwLock`. In clustered mode it also
//! implements [`ClusteredCache`] and counts every non-quiet write as a
//! replication announcement, which lets callers observe whether bookkeeping
//! traffic stayed quiet.
//!
//! Several strategy instances can share one backend through an `Arc`, each
//! standing in for a separate cluster node.
//!
//! Locks whose timeout has passed are reclaimed lazily: a read that finds
//! one drops it and reports the key as absent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use softlock_core::{
    CacheError, CacheKey, Lockable, SoftlockResult, Timestamp, Timestamper, DEFAULT_LOCK_TIMEOUT,
};

use super::key_lock::KeyLockTable;
use super::traits::{CacheBackend, CacheStats, ClusteredCache};

/// In-memory cache backend for tests and single-process deployments.
#[derive(Debug)]
pub struct InMemoryCacheBackend<V, Ver> {
    entries: RwLock<HashMap<CacheKey, Lockable<V, Ver>>>,
    locks: KeyLockTable,
    clock: Arc<Timestamper>,
    timeout: i64,
    clustered: bool,
    destroyed: AtomicBool,
    stats: RwLock<CacheStats>,
}

impl<V, Ver> Default for InMemoryCacheBackend<V, Ver> {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl<V, Ver> InMemoryCacheBackend<V, Ver> {
    /// Create a local (non-clustered) backend.
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            locks: KeyLockTable::new(),
            clock: Arc::new(Timestamper::new()),
            timeout: Timestamper::units(lock_timeout),
            clustered: false,
            destroyed: AtomicBool::new(false),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Create a backend that exposes quiet, non-replicating operations.
    pub fn clustered(lock_timeout: Duration) -> Self {
        Self {
            clustered: true,
            ..Self::new(lock_timeout)
        }
    }

    /// Share a logical clock with other backends.
    pub fn with_clock(mut self, clock: Arc<Timestamper>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &Arc<Timestamper> {
        &self.clock
    }

    pub fn is_clustered(&self) -> bool {
        self.clustered
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Whether some node currently holds the exclusive lock on `key`.
    pub fn is_key_locked(&self, key: &CacheKey) -> bool {
        self.locks.is_locked(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop `key` the way capacity pressure or a TTL would.
    pub fn evict(&self, key: &CacheKey) -> SoftlockResult<bool> {
        let removed = self.entries.write()?.remove(key).is_some();
        if removed {
            self.record_evictions(1);
        }
        Ok(removed)
    }

    /// Reclaim soft locks whose timeout has passed. Returns how many were
    /// dropped.
    pub fn purge_expired_locks(&self) -> SoftlockResult<usize> {
        let now = self.clock.next();
        let mut entries = self.entries.write()?;
        let before = entries.len();
        entries.retain(|_, slot| !matches!(slot, Lockable::Lock(lock) if lock.is_expired(now)));
        let purged = before - entries.len();
        drop(entries);

        self.record_evictions(purged);
        Ok(purged)
    }

    fn ensure_live(&self) -> Result<(), CacheError> {
        if self.is_destroyed() {
            return Err(CacheError::Destroyed);
        }
        Ok(())
    }

    fn record_evictions(&self, count: usize) {
        if count == 0 {
            return;
        }
        if let Ok(mut stats) = self.stats.write() {
            stats.evictions += count as u64;
        }
    }

    fn record_lookup(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }

    fn store(&self, key: &CacheKey, value: Lockable<V, Ver>, announce: bool) -> SoftlockResult<()> {
        self.ensure_live()?;
        self.entries.write()?.insert(key.clone(), value);
        if announce && self.clustered {
            if let Ok(mut stats) = self.stats.write() {
                stats.announcements += 1;
            }
        }
        Ok(())
    }
}

impl<V, Ver> InMemoryCacheBackend<V, Ver>
where
    V: Clone,
    Ver: Clone,
{
    /// Read a slot, reclaiming it first if it holds a timed-out lock.
    fn lookup(&self, key: &CacheKey) -> SoftlockResult<Option<Lockable<V, Ver>>> {
        self.ensure_live()?;
        let now = self.clock.next();
        {
            let entries = self.entries.read()?;
            match entries.get(key) {
                Some(Lockable::Lock(lock)) if lock.is_expired(now) => {}
                slot => return Ok(slot.cloned()),
            }
        }

        let mut entries = self.entries.write()?;
        let reclaimed = matches!(entries.get(key), Some(Lockable::Lock(lock)) if lock.is_expired(now));
        if !reclaimed {
            return Ok(entries.get(key).cloned());
        }
        entries.remove(key);
        drop(entries);
        self.record_evictions(1);
        Ok(None)
    }
}

impl<V, Ver> CacheBackend<V, Ver> for InMemoryCacheBackend<V, Ver>
where
    V: Clone + Send + Sync,
    Ver: Clone + Send + Sync,
{
    fn get(&self, key: &CacheKey) -> SoftlockResult<Option<Lockable<V, Ver>>> {
        let slot = self.lookup(key)?;
        self.record_lookup(slot.is_some());
        Ok(slot)
    }

    fn put(&self, key: &CacheKey, value: Lockable<V, Ver>) -> SoftlockResult<()> {
        self.store(key, value, true)
    }

    fn remove(&self, key: &CacheKey) -> SoftlockResult<()> {
        self.ensure_live()?;
        self.entries.write()?.remove(key);
        Ok(())
    }

    fn clear(&self) -> SoftlockResult<()> {
        self.ensure_live()?;
        self.entries.write()?.clear();
        Ok(())
    }

    fn lock(&self, key: &CacheKey) -> SoftlockResult<()> {
        self.ensure_live()?;
        self.locks.acquire(key)?;
        Ok(())
    }

    fn unlock(&self, key: &CacheKey) -> SoftlockResult<()> {
        self.locks.release(key)?;
        Ok(())
    }

    fn next_timestamp(&self) -> Timestamp {
        self.clock.next()
    }

    fn timeout(&self) -> i64 {
        self.timeout
    }

    fn destroy(&self) -> SoftlockResult<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Err(CacheError::Destroyed.into());
        }
        self.entries.write()?.clear();
        Ok(())
    }

    fn stats(&self) -> SoftlockResult<CacheStats> {
        let mut stats = self.stats.read()?.clone();
        stats.entry_count = self.entries.read()?.len() as u64;
        Ok(stats)
    }

    fn as_clustered(&self) -> Option<&dyn ClusteredCache<V, Ver>> {
        if self.clustered {
            Some(self)
        } else {
            None
        }
    }
}

impl<V, Ver> ClusteredCache<V, Ver> for InMemoryCacheBackend<V, Ver>
where
    V: Clone + Send + Sync,
    Ver: Clone + Send + Sync,
{
    fn get_quiet(&self, key: &CacheKey) -> SoftlockResult<Option<Lockable<V, Ver>>> {
        self.lookup(key)
    }

    fn put_quiet(&self, key: &CacheKey, value: Lockable<V, Ver>) -> SoftlockResult<()> {
        self.store(key, value, false)
    }
}
