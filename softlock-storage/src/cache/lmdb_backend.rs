//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep soft-lock slots in a
//! memory-mapped, crash-safe store so cached entries and outstanding locks
//! survive a process restart.
//!
//! # Storage Format
//!
//! Keys are [`CacheKey::encode`] bytes; values are the JSON encoding of the
//! [`Lockable`] slot. Any serde-serializable value and version type can be
//! stored in the same environment.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get`
//! - Write transactions for `put`, `remove`, `clear` and lock purging
//! - An in-process [`KeyLockTable`] for the per-key exclusive lock, since the
//!   environment is only shared by threads of this process
//!
//! A `get` that finds a timed-out soft lock deletes it and reports a miss.
//! On open, the clock is seeded past every timestamp already stored so a
//! reopened environment never issues a reading older than its own slots.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use serde::{de::DeserializeOwned, Serialize};
use softlock_core::{
    CacheError, CacheKey, Lockable, SoftlockError, SoftlockResult, Timestamp, Timestamper,
};

use super::key_lock::KeyLockTable;
use super::traits::{CacheBackend, CacheStats};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbCacheError to SoftlockError.
impl From<LmdbCacheError> for SoftlockError {
    fn from(e: LmdbCacheError) -> Self {
        SoftlockError::Cache(CacheError::Backend {
            operation: "lmdb".to_string(),
            reason: e.to_string(),
        })
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

// Slots are inspected as untyped JSON here so these work for any value type.

fn is_expired_lock(raw: &[u8], now: Timestamp) -> bool {
    let Ok(slot) = serde_json::from_slice::<serde_json::Value>(raw) else {
        return false;
    };
    let is_lock = slot.get("kind").and_then(|k| k.as_str()) == Some("lock");
    let timeout = slot.get("timeout").and_then(|t| t.as_i64());
    matches!((is_lock, timeout), (true, Some(timeout)) if timeout < now)
}

/// Largest clock reading recorded in a slot.
fn latest_timestamp(raw: &[u8]) -> Option<Timestamp> {
    let slot: serde_json::Value = serde_json::from_slice(raw).ok()?;
    ["fresh_timestamp", "timeout", "unlock_timestamp"]
        .iter()
        .filter_map(|field| slot.get(field).and_then(|t| t.as_i64()))
        .max()
}

/// LMDB-backed soft-lock cache.
///
/// # Example
///
/// ```ignore
/// let backend = Arc::new(LmdbCacheBackend::new("/tmp/cache", 100, Duration::from_secs(60))?);
/// let strategy: ReadWriteStrategy<_, Account, u64> =
///     ReadWriteStrategy::new(backend, StrategyConfig::for_region("accounts"))?;
/// ```
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    locks: KeyLockTable,
    clock: Timestamper,
    timeout: i64,
    destroyed: AtomicBool,
    stats: RwLock<CacheStats>,
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    /// * `lock_timeout` - Soft-lock lifetime reported through `timeout()`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        lock_timeout: Duration,
    ) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        let floor = {
            let rtxn = env.read_txn().map_err(txn_err)?;
            let mut floor = 0;
            for entry in db.iter(&rtxn).map_err(txn_err)? {
                let (_, raw) = entry.map_err(txn_err)?;
                floor = floor.max(latest_timestamp(raw).unwrap_or(0));
            }
            floor
        };
        tracing::debug!(floor, "seeded lmdb cache clock");

        Ok(Self {
            env,
            db,
            locks: KeyLockTable::new(),
            clock: Timestamper::starting_after(floor),
            timeout: Timestamper::units(lock_timeout),
            destroyed: AtomicBool::new(false),
            stats: RwLock::new(CacheStats::default()),
        })
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Keys of every stored slot, in byte order.
    pub fn keys(&self) -> SoftlockResult<Vec<CacheKey>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut keys = Vec::new();
        for entry in self.db.iter(&rtxn).map_err(txn_err)? {
            let (raw, _) = entry.map_err(txn_err)?;
            if let Some(key) = CacheKey::decode(raw) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Drop soft locks whose timeout has passed and return their keys.
    ///
    /// Slots are decoded without knowing the cached value type: only the
    /// `kind` tag and `timeout` field are inspected.
    pub fn purge_expired_locks(&self) -> SoftlockResult<Vec<CacheKey>> {
        self.ensure_live()?;
        let now = self.clock.next();

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut expired = Vec::new();
        {
            for entry in self.db.iter(&wtxn).map_err(txn_err)? {
                let (raw_key, raw_value) = entry.map_err(txn_err)?;
                if is_expired_lock(raw_value, now) {
                    expired.push(raw_key.to_vec());
                }
            }
        }
        for raw_key in &expired {
            self.db.delete(&mut wtxn, raw_key).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;

        self.record_evictions(expired.len());
        Ok(expired
            .iter()
            .filter_map(|raw| CacheKey::decode(raw))
            .collect())
    }

    fn ensure_live(&self) -> Result<(), CacheError> {
        if self.is_destroyed() {
            return Err(CacheError::Destroyed);
        }
        Ok(())
    }

    /// Delete the slot under `key` if it still holds a lock expired at `now`.
    fn reclaim_expired(&self, key: &CacheKey, now: Timestamp) -> SoftlockResult<()> {
        let raw_key = key.encode();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let expired = self
            .db
            .get(&wtxn, &raw_key)
            .map_err(txn_err)?
            .is_some_and(|raw| is_expired_lock(raw, now));
        if expired {
            self.db.delete(&mut wtxn, &raw_key).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        if expired {
            self.record_evictions(1);
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
}

impl<V, Ver> CacheBackend<V, Ver> for LmdbCacheBackend
where
    V: Serialize + DeserializeOwned + Send + Sync,
    Ver: Serialize + DeserializeOwned + Send + Sync,
{
    fn get(&self, key: &CacheKey) -> SoftlockResult<Option<Lockable<V, Ver>>> {
        self.ensure_live()?;
        let now = self.clock.next();

        let slot: Option<Lockable<V, Ver>> = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            match self.db.get(&rtxn, &key.encode()).map_err(txn_err)? {
                Some(bytes) => Some(serde_json::from_slice(bytes).map_err(|e| {
                    CacheError::Serialization {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?),
                None => None,
            }
        };

        if let Some(Lockable::Lock(lock)) = &slot {
            if lock.is_expired(now) {
                self.reclaim_expired(key, now)?;
                self.record_lookup(false);
                return Ok(None);
            }
        }
        self.record_lookup(slot.is_some());
        Ok(slot)
    }

    fn put(&self, key: &CacheKey, value: Lockable<V, Ver>) -> SoftlockResult<()> {
        self.ensure_live()?;
        let bytes = serde_json::to_vec(&value).map_err(|e| CacheError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, &key.encode(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> SoftlockResult<()> {
        self.ensure_live()?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db.delete(&mut wtxn, &key.encode()).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn clear(&self) -> SoftlockResult<()> {
        self.ensure_live()?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db.clear(&mut wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
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
        self.env.force_sync().map_err(txn_err)?;
        Ok(())
    }

    fn stats(&self) -> SoftlockResult<CacheStats> {
        let mut stats = self.stats.read()?.clone();
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        stats.entry_count = self.db.len(&rtxn).map_err(txn_err)?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use softlock_core::{Item, Lock, RegionId};
    use tempfile::TempDir;
    use uuid::Uuid;

    type Slot = Lockable<String, u64>;

    fn create_test_backend() -> (LmdbCacheBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend = LmdbCacheBackend::new(temp_dir.path(), 10, Duration::from_secs(60))
            .expect("backend creation should succeed");
        (backend, temp_dir)
    }

    fn key() -> CacheKey {
        CacheKey::new(Uuid::now_v7(), RegionId(1), Uuid::now_v7())
    }

    fn get(backend: &LmdbCacheBackend, key: &CacheKey) -> Option<Slot> {
        CacheBackend::<String, u64>::get(backend, key).expect("get should succeed")
    }

    fn put(backend: &LmdbCacheBackend, key: &CacheKey, slot: Slot) {
        CacheBackend::<String, u64>::put(backend, key, slot).expect("put should succeed");
    }

    #[test]
    fn test_put_and_get_item() {
        let (backend, _temp_dir) = create_test_backend();
        let key = key();
        let slot: Slot = Item::new("hello".to_string(), Some(3), 77).into();

        put(&backend, &key, slot.clone());
        assert_eq!(get(&backend, &key), Some(slot));
    }

    #[test]
    fn test_put_and_get_lock() {
        let (backend, _temp_dir) = create_test_backend();
        let key = key();
        let slot: Slot = Lock::new(i64::MAX - 1, 9, Some(2))
            .relock(i64::MAX)
            .into();

        put(&backend, &key, slot.clone());
        let stored = get(&backend, &key).expect("slot should exist");
        let lock = stored.as_lock().expect("slot should be a lock");
        assert_eq!(lock.multiplicity(), 2);
        assert!(lock.was_locked_concurrently());
        assert_eq!(stored, slot);
    }

    #[test]
    fn test_get_nonexistent() {
        let (backend, _temp_dir) = create_test_backend();
        assert!(get(&backend, &key()).is_none());
    }

    #[test]
    fn test_remove_and_clear() {
        let (backend, _temp_dir) = create_test_backend();
        let a = key();
        let b = key();
        put(&backend, &a, Item::new("a".to_string(), None, 1).into());
        put(&backend, &b, Item::new("b".to_string(), None, 1).into());

        CacheBackend::<String, u64>::remove(&backend, &a).expect("remove should succeed");
        assert!(get(&backend, &a).is_none());
        assert!(get(&backend, &b).is_some());

        CacheBackend::<String, u64>::clear(&backend).expect("clear should succeed");
        assert!(get(&backend, &b).is_none());
        assert!(backend.keys().expect("keys should succeed").is_empty());
    }

    #[test]
    fn test_wrong_value_type_is_serialization_error() {
        let (backend, _temp_dir) = create_test_backend();
        let key = key();
        put(&backend, &key, Item::new("text".to_string(), Some(1), 1).into());

        let result = CacheBackend::<u64, u64>::get(&backend, &key);
        assert!(matches!(
            result,
            Err(SoftlockError::Cache(CacheError::Serialization { .. }))
        ));
    }

    #[test]
    fn test_slots_survive_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let key = key();
        {
            let backend = LmdbCacheBackend::new(temp_dir.path(), 10, Duration::from_secs(60))
                .expect("backend creation should succeed");
            put(&backend, &key, Item::new("kept".to_string(), Some(1), 5).into());
        }

        let reopened = LmdbCacheBackend::new(temp_dir.path(), 10, Duration::from_secs(60))
            .expect("backend creation should succeed");
        let slot = get(&reopened, &key).expect("slot should survive reopen");
        assert_eq!(slot.as_item().map(|i| i.value().as_str()), Some("kept"));
    }

    #[test]
    fn test_purge_expired_locks() {
        let (backend, _temp_dir) = create_test_backend();
        let expired = key();
        let live = key();
        let cached = key();
        put(&backend, &expired, Lock::new(0, 1, None).into());
        put(&backend, &live, Lock::new(i64::MAX, 2, None).into());
        put(&backend, &cached, Item::new("x".to_string(), None, 0).into());

        let purged = backend.purge_expired_locks().expect("purge should succeed");
        assert_eq!(purged, vec![expired.clone()]);
        assert!(get(&backend, &expired).is_none());
        assert!(get(&backend, &live).is_some());
        assert!(get(&backend, &cached).is_some());
    }

    #[test]
    fn test_get_reclaims_expired_lock() {
        let (backend, _temp_dir) = create_test_backend();
        let expired = key();
        let cached = key();
        put(&backend, &expired, Lock::new(0, 1, None).into());
        put(&backend, &cached, Item::new("x".to_string(), None, 0).into());

        assert!(get(&backend, &expired).is_none());
        assert_eq!(backend.keys().expect("keys should succeed"), vec![cached.clone()]);
        assert!(get(&backend, &cached).is_some());

        let stats = CacheBackend::<String, u64>::stats(&backend).expect("stats should succeed");
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[test]
    fn test_reopen_clock_starts_after_stored_timestamps() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let far_future: Timestamp = 1 << 60;
        {
            let backend = LmdbCacheBackend::new(temp_dir.path(), 10, Duration::from_secs(60))
                .expect("backend creation should succeed");
            put(&backend, &key(), Item::new("late".to_string(), Some(1), far_future).into());
            put(&backend, &key(), Lock::new(far_future - 5, 2, None).into());
        }

        let reopened = LmdbCacheBackend::new(temp_dir.path(), 10, Duration::from_secs(60))
            .expect("backend creation should succeed");
        let next = CacheBackend::<String, u64>::next_timestamp(&reopened);
        assert!(next > far_future);
    }

    #[test]
    fn test_stats() {
        let (backend, _temp_dir) = create_test_backend();
        let key = key();

        let _ = get(&backend, &key);
        put(&backend, &key, Item::new("a".to_string(), None, 0).into());
        let _ = get(&backend, &key);
        let _ = get(&backend, &key);

        let stats = CacheBackend::<String, u64>::stats(&backend).expect("stats should succeed");
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entry_count, 1);
    }

    #[test]
    fn test_destroy_syncs_and_rejects_further_use() {
        let (backend, _temp_dir) = create_test_backend();
        CacheBackend::<String, u64>::destroy(&backend).expect("destroy should succeed");
        assert!(backend.is_destroyed());

        let result = CacheBackend::<String, u64>::get(&backend, &key());
        assert_eq!(result, Err(SoftlockError::Cache(CacheError::Destroyed)));
    }
}
