//! Read-committed concurrency strategy built on soft locks.
//!
//! Transactions that change a row first `lock` its cache key, which swaps the
//! cached [`Item`] for a [`Lock`]. While any lock is outstanding every read
//! misses and opportunistic `put`s are refused, so readers fall through to
//! the database instead of seeing uncommitted or half-replaced data. When
//! the writer commits, `after_update` either installs the new value or, if
//! another transaction locked the key concurrently, just drops its hold and
//! leaves the key locked until the last holder is gone.
//!
//! # Locking
//!
//! Every operation body runs under two locks, always taken in this order:
//!
//! 1. the strategy mutex, which also owns the lock-id counter
//! 2. the backend's exclusive lock on the key, which spans every node
//!    sharing a distributed cache
//!
//! Both are released by guards, so a backend error never leaves either held.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use softlock_core::{
    CacheKey, Item, Lock, LockId, Lockable, SoftlockResult, StrategyConfig, Timestamp,
};

use super::traits::{CacheBackend, CacheStats};

/// Contract between a transactional data layer and a cache region.
///
/// `put` is an opportunistic fill after a database read. `lock`,
/// `release`, `after_update` and `after_insert` bracket writes.
pub trait CacheConcurrencyStrategy<V, Ver>: Send + Sync {
    /// Cached value for `key`, if it was cached strictly before the
    /// transaction that started at `tx_timestamp`.
    fn get(&self, key: &CacheKey, tx_timestamp: Timestamp) -> SoftlockResult<Option<V>>;

    /// Invalidate `key` ahead of a write. The returned lock is the caller's
    /// token for the matching `release` or `after_update`.
    fn lock(&self, key: &CacheKey, version: Option<Ver>) -> SoftlockResult<Lock<Ver>>;

    /// Cache a value just read from the database. Returns whether it was
    /// stored.
    fn put(
        &self,
        key: &CacheKey,
        value: V,
        tx_timestamp: Timestamp,
        version: Option<Ver>,
        comparator: &dyn Fn(&Ver, &Ver) -> Ordering,
    ) -> SoftlockResult<bool>;

    /// Drop one hold on `key` without caching anything, e.g. after a
    /// rollback.
    fn release(&self, key: &CacheKey, token: &Lock<Ver>) -> SoftlockResult<()>;

    /// Called after the transaction holding `token` committed an update.
    /// Returns whether the new value was cached.
    fn after_update(
        &self,
        key: &CacheKey,
        value: V,
        version: Option<Ver>,
        token: &Lock<Ver>,
    ) -> SoftlockResult<bool>;

    /// Called after a transaction committed an insert. Returns whether the
    /// value was cached.
    fn after_insert(&self, key: &CacheKey, value: V, version: Option<Ver>)
        -> SoftlockResult<bool>;

    /// Called when the data layer evicts `key` from its own session.
    fn evict(&self, key: &CacheKey) -> SoftlockResult<()>;

    /// Called before the insert commits.
    fn insert(&self, key: &CacheKey, value: &V) -> SoftlockResult<bool>;

    /// Called before the update commits.
    fn update(&self, key: &CacheKey, value: &V) -> SoftlockResult<bool>;

    fn clear(&self) -> SoftlockResult<()>;

    fn remove(&self, key: &CacheKey) -> SoftlockResult<()>;

    /// Release backend resources. Failures are logged, never returned.
    fn destroy(&self);

    /// Name of the region this strategy guards.
    fn region(&self) -> &str;
}

/// Mutable state shared by every operation of one strategy instance.
#[derive(Debug, Default)]
struct StrategyState {
    next_lock_id: LockId,
}

impl StrategyState {
    fn next_lock_id(&mut self) -> LockId {
        let id = self.next_lock_id;
        self.next_lock_id = id.wrapping_add(1);
        id
    }
}

/// Holds the backend's exclusive lock on one key until dropped.
struct KeyGuard<'a, V, Ver> {
    backend: &'a dyn CacheBackend<V, Ver>,
    key: &'a CacheKey,
}

impl<V, Ver> Drop for KeyGuard<'_, V, Ver> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.unlock(self.key) {
            tracing::error!(key = %self.key, error = %e, "Failed to unlock cache key");
        }
    }
}

/// Read-write (read-committed) concurrency strategy.
///
/// # Type Parameters
///
/// - `B`: The cache backend holding the soft-lock slots
/// - `V`: The cached value type
/// - `Ver`: The row version type used to order competing fills
///
/// # Example
///
/// ```ignore
/// let backend = Arc::new(InMemoryCacheBackend::new(Duration::from_secs(60)));
/// let strategy: ReadWriteStrategy<_, Account, u64> =
///     ReadWriteStrategy::new(backend, StrategyConfig::for_region("accounts"))?;
///
/// let token = strategy.lock(&key, Some(7))?;
/// // ... commit the update ...
/// strategy.after_update(&key, account, Some(8), &token)?;
/// ```
pub struct ReadWriteStrategy<B, V, Ver> {
    backend: Arc<B>,
    config: StrategyConfig,
    state: Mutex<StrategyState>,
    _marker: PhantomData<fn() -> (V, Ver)>,
}

impl<B, V, Ver> ReadWriteStrategy<B, V, Ver>
where
    B: CacheBackend<V, Ver>,
{
    /// Create a strategy in front of `backend`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` does not validate, which
    /// includes requesting minimal puts.
    pub fn new(backend: Arc<B>, config: StrategyConfig) -> SoftlockResult<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            state: Mutex::new(StrategyState::default()),
            _marker: PhantomData,
        })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Backend statistics.
    pub fn stats(&self) -> SoftlockResult<CacheStats> {
        self.backend.stats()
    }

    fn lock_key<'a>(&'a self, key: &'a CacheKey) -> SoftlockResult<KeyGuard<'a, V, Ver>> {
        self.backend.lock(key)?;
        Ok(KeyGuard {
            backend: &*self.backend,
            key,
        })
    }

    fn read(&self, key: &CacheKey) -> SoftlockResult<Option<Lockable<V, Ver>>> {
        match self.backend.as_clustered() {
            Some(clustered) => clustered.get_quiet(key),
            None => self.backend.get(key),
        }
    }

    /// Lock bookkeeping is never announced to other nodes.
    fn write_lock(&self, key: &CacheKey, lock: Lock<Ver>) -> SoftlockResult<()> {
        match self.backend.as_clustered() {
            Some(clustered) => clustered.put_quiet(key, lock.into()),
            None => self.backend.put(key, lock.into()),
        }
    }

    fn write_item(&self, key: &CacheKey, value: V, version: Option<Ver>) -> SoftlockResult<()> {
        let item = Item::new(value, version, self.backend.next_timestamp());
        self.backend.put(key, item.into())
    }

    fn next_lock_timeout(&self) -> Timestamp {
        self.backend
            .next_timestamp()
            .saturating_add(self.backend.timeout())
    }

    /// The caller's lock is gone, either reclaimed by the backend or replaced
    /// after a remove. Park an already-released lock on the key so it stays
    /// uncacheable until the backend reclaims it.
    fn handle_lock_expiry(&self, state: &mut StrategyState, key: &CacheKey) -> SoftlockResult<()> {
        tracing::warn!(
            region = %self.config.region,
            key = %key,
            "Cache soft lock expired or was replaced; key stays uncacheable until reclaimed"
        );
        let timeout = self.next_lock_timeout();
        let lock = Lock::new(timeout, state.next_lock_id(), None).unlock(timeout);
        self.write_lock(key, lock)
    }
}

impl<B, V, Ver> CacheConcurrencyStrategy<V, Ver> for ReadWriteStrategy<B, V, Ver>
where
    B: CacheBackend<V, Ver>,
    Ver: Clone,
{
    fn get(&self, key: &CacheKey, tx_timestamp: Timestamp) -> SoftlockResult<Option<V>> {
        let _state = self.state.lock()?;
        let _key = self.lock_key(key)?;

        match self.read(key)? {
            Some(Lockable::Item(item)) if item.is_gettable(tx_timestamp) => {
                Ok(Some(item.into_value()))
            }
            _ => Ok(None),
        }
    }

    fn lock(&self, key: &CacheKey, version: Option<Ver>) -> SoftlockResult<Lock<Ver>> {
        let mut state = self.state.lock()?;
        let _key = self.lock_key(key)?;

        let timeout = self.next_lock_timeout();
        let lock = match self.read(key)? {
            Some(slot) => slot.lock(timeout, || state.next_lock_id()),
            None => Lock::new(timeout, state.next_lock_id(), version),
        };
        self.write_lock(key, lock.clone())?;

        tracing::debug!(
            region = %self.config.region,
            key = %key,
            lock_id = lock.id(),
            multiplicity = lock.multiplicity(),
            "Locked cache key"
        );
        Ok(lock)
    }

    fn put(
        &self,
        key: &CacheKey,
        value: V,
        tx_timestamp: Timestamp,
        version: Option<Ver>,
        comparator: &dyn Fn(&Ver, &Ver) -> Ordering,
    ) -> SoftlockResult<bool> {
        let _state = self.state.lock()?;
        let _key = self.lock_key(key)?;

        let puttable = match self.read(key)? {
            Some(slot) => slot.is_puttable(version.as_ref(), comparator),
            None => true,
        };
        if !puttable {
            tracing::debug!(
                region = %self.config.region,
                key = %key,
                tx_timestamp,
                "Refused cache put"
            );
            return Ok(false);
        }

        self.write_item(key, value, version)?;
        Ok(true)
    }

    fn release(&self, key: &CacheKey, token: &Lock<Ver>) -> SoftlockResult<()> {
        let mut state = self.state.lock()?;
        let _key = self.lock_key(key)?;

        let held = self
            .read(key)?
            .filter(|slot| slot.is_unlockable(token))
            .and_then(Lockable::into_lock);
        match held {
            Some(lock) => {
                let lock = lock.unlock(self.backend.next_timestamp());
                tracing::debug!(
                    region = %self.config.region,
                    key = %key,
                    lock_id = lock.id(),
                    multiplicity = lock.multiplicity(),
                    "Released cache key"
                );
                self.write_lock(key, lock)
            }
            None => self.handle_lock_expiry(&mut state, key),
        }
    }

    fn after_update(
        &self,
        key: &CacheKey,
        value: V,
        version: Option<Ver>,
        token: &Lock<Ver>,
    ) -> SoftlockResult<bool> {
        let mut state = self.state.lock()?;
        let _key = self.lock_key(key)?;

        let held = self
            .read(key)?
            .filter(|slot| slot.is_unlockable(token))
            .and_then(Lockable::into_lock);
        match held {
            Some(lock) if lock.was_locked_concurrently() => {
                // Another transaction may commit an older value after us.
                let lock = lock.unlock(self.backend.next_timestamp());
                self.write_lock(key, lock)?;
                Ok(false)
            }
            Some(_) => {
                self.write_item(key, value, version)?;
                Ok(true)
            }
            None => {
                self.handle_lock_expiry(&mut state, key)?;
                Ok(false)
            }
        }
    }

    fn after_insert(
        &self,
        key: &CacheKey,
        value: V,
        version: Option<Ver>,
    ) -> SoftlockResult<bool> {
        let _state = self.state.lock()?;
        let _key = self.lock_key(key)?;

        if self.read(key)?.is_some() {
            return Ok(false);
        }
        self.write_item(key, value, version)?;
        Ok(true)
    }

    fn evict(&self, _key: &CacheKey) -> SoftlockResult<()> {
        Ok(())
    }

    fn insert(&self, _key: &CacheKey, _value: &V) -> SoftlockResult<bool> {
        Ok(false)
    }

    fn update(&self, _key: &CacheKey, _value: &V) -> SoftlockResult<bool> {
        Ok(false)
    }

    fn clear(&self) -> SoftlockResult<()> {
        self.backend.clear()
    }

    fn remove(&self, key: &CacheKey) -> SoftlockResult<()> {
        self.backend.remove(key)
    }

    fn destroy(&self) {
        if let Err(e) = self.backend.destroy() {
            tracing::error!(region = %self.config.region, error = %e, "Failed to destroy cache backend");
        }
    }

    fn region(&self) -> &str {
        &self.config.region
    }
}
