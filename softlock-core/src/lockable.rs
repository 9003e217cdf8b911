//! Soft-lock state stored under each cache key.
//!
//! Every cache slot managed by the read-write strategy holds a [`Lockable`]:
//! either an [`Item`] (committed, readable data) or a [`Lock`] (one or more
//! transactions are rewriting the row, so the cached value cannot be trusted).
//!
//! # State Transition Diagram
//!
//! ```text
//!  (absent) ── lock() ─────────────┐
//!     │                            ▼
//!     │ after_insert()/put()     Lock{mult=1} ── lock() ──→ Lock{mult=n+1, concurrent}
//!     ▼                            │   ▲                        │
//!   Item ──────── lock() ──────────┘   └──── release() ─────────┘
//!     ▲                            │                            │
//!     └── after_update() ──────────┘     release()/after_update() by last holder
//!         (never contended)                                     ▼
//!                                                  Lock{mult=0, unlock_timestamp}
//!                                                     │      │
//!                                   lock() joins ─────┘      └── timeout passes:
//!                                   (mult=1, concurrent)         backend drops it → (absent)
//!
//!  stale token (slot absent, an Item, or another lock id):
//!     any slot ── release()/after_update() ──→ Lock{mult=0, no version}  (recovery)
//! ```
//!
//! Transitions consume the old value and return its replacement, so a
//! `Lockable` read from the backend is never mutated where it lives.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{LockId, Timestamp};

/// `unlock_timestamp` value of a lock that has not been fully released.
pub const UNLOCK_PENDING: Timestamp = -1;

// ============================================================================
// ITEM
// ============================================================================

/// Committed cached data, readable by transactions that started after it
/// was cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item<V, Ver> {
    value: V,
    version: Option<Ver>,
    fresh_timestamp: Timestamp,
}

impl<V, Ver> Item<V, Ver> {
    pub fn new(value: V, version: Option<Ver>, fresh_timestamp: Timestamp) -> Self {
        Self {
            value,
            version,
            fresh_timestamp,
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn version(&self) -> Option<&Ver> {
        self.version.as_ref()
    }

    /// Logical time at which this item entered the cache.
    pub fn fresh_timestamp(&self) -> Timestamp {
        self.fresh_timestamp
    }

    /// A transaction may read this item only if it was cached strictly
    /// before the transaction started.
    pub fn is_gettable(&self, tx_timestamp: Timestamp) -> bool {
        self.fresh_timestamp < tx_timestamp
    }

    /// An item is only replaced by data carrying a strictly newer version.
    /// Unversioned data on either side never replaces an item.
    pub fn is_puttable<F>(&self, new_version: Option<&Ver>, comparator: F) -> bool
    where
        F: FnOnce(&Ver, &Ver) -> Ordering,
    {
        match (self.version.as_ref(), new_version) {
            (Some(existing), Some(proposed)) => comparator(existing, proposed) == Ordering::Less,
            _ => false,
        }
    }

    /// Invalidate this item, producing a fresh single-holder lock.
    pub fn lock(self, timeout: Timestamp, id: LockId) -> Lock<Ver> {
        Lock::new(timeout, id, self.version)
    }
}

// ============================================================================
// LOCK
// ============================================================================

/// Soft lock: the row is being rewritten and cached data is not trustworthy.
///
/// The lock returned by the strategy's `lock` operation doubles as the
/// caller's token; only its `id` matters when the token is presented back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock<Ver> {
    id: LockId,
    version: Option<Ver>,
    timeout: Timestamp,
    multiplicity: u32,
    concurrent_lock: bool,
    unlock_timestamp: Timestamp,
}

impl<Ver> Lock<Ver> {
    pub fn new(timeout: Timestamp, id: LockId, version: Option<Ver>) -> Self {
        Self {
            id,
            version,
            timeout,
            multiplicity: 1,
            concurrent_lock: false,
            unlock_timestamp: UNLOCK_PENDING,
        }
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    pub fn version(&self) -> Option<&Ver> {
        self.version.as_ref()
    }

    /// Logical time after which the backend may reclaim this lock.
    pub fn timeout(&self) -> Timestamp {
        self.timeout
    }

    /// Number of transactions that invalidated the key and have not resolved.
    pub fn multiplicity(&self) -> u32 {
        self.multiplicity
    }

    /// True once a second holder has ever joined this lock.
    pub fn was_locked_concurrently(&self) -> bool {
        self.concurrent_lock
    }

    /// When the last holder released, if it has.
    pub fn unlock_timestamp(&self) -> Option<Timestamp> {
        (self.multiplicity == 0).then_some(self.unlock_timestamp)
    }

    pub fn is_released(&self) -> bool {
        self.multiplicity == 0
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.timeout < now
    }

    /// Another transaction joins this lock.
    pub fn relock(mut self, timeout: Timestamp) -> Self {
        self.concurrent_lock = true;
        self.multiplicity += 1;
        self.timeout = self.timeout.max(timeout);
        self
    }

    /// One holder resolves its write. A fully released lock is returned
    /// unchanged, keeping its original unlock timestamp.
    pub fn unlock(mut self, timestamp: Timestamp) -> Self {
        if self.multiplicity == 0 {
            return self;
        }
        self.multiplicity -= 1;
        if self.multiplicity == 0 {
            self.unlock_timestamp = timestamp;
        }
        self
    }
}

// ============================================================================
// LOCKABLE
// ============================================================================

/// Content of a cache slot managed by the read-write strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Lockable<V, Ver> {
    Item(Item<V, Ver>),
    Lock(Lock<Ver>),
}

impl<V, Ver> Lockable<V, Ver> {
    pub fn is_lock(&self) -> bool {
        matches!(self, Self::Lock(_))
    }

    pub fn as_item(&self) -> Option<&Item<V, Ver>> {
        match self {
            Self::Item(item) => Some(item),
            Self::Lock(_) => None,
        }
    }

    pub fn as_lock(&self) -> Option<&Lock<Ver>> {
        match self {
            Self::Lock(lock) => Some(lock),
            Self::Item(_) => None,
        }
    }

    pub fn into_lock(self) -> Option<Lock<Ver>> {
        match self {
            Self::Lock(lock) => Some(lock),
            Self::Item(_) => None,
        }
    }

    /// Locked data is never readable.
    pub fn is_gettable(&self, tx_timestamp: Timestamp) -> bool {
        match self {
            Self::Item(item) => item.is_gettable(tx_timestamp),
            Self::Lock(_) => false,
        }
    }

    /// A lock always wins over an opportunistic cache fill.
    pub fn is_puttable<F>(&self, new_version: Option<&Ver>, comparator: F) -> bool
    where
        F: FnOnce(&Ver, &Ver) -> Ordering,
    {
        match self {
            Self::Item(item) => item.is_puttable(new_version, comparator),
            Self::Lock(_) => false,
        }
    }

    /// Whether `token` still refers to the lock held in this slot.
    pub fn is_unlockable(&self, token: &Lock<Ver>) -> bool {
        matches!(self, Self::Lock(lock) if lock.id() == token.id())
    }

    /// Produce the next lock state. `next_id` is only consulted when a new
    /// lock has to be created.
    pub fn lock<F>(self, timeout: Timestamp, next_id: F) -> Lock<Ver>
    where
        F: FnOnce() -> LockId,
    {
        match self {
            Self::Item(item) => item.lock(timeout, next_id()),
            Self::Lock(lock) => lock.relock(timeout),
        }
    }
}

impl<V, Ver> From<Item<V, Ver>> for Lockable<V, Ver> {
    fn from(item: Item<V, Ver>) -> Self {
        Self::Item(item)
    }
}

impl<V, Ver> From<Lock<Ver>> for Lockable<V, Ver> {
    fn from(lock: Lock<Ver>) -> Self {
        Self::Lock(lock)
    }
}
