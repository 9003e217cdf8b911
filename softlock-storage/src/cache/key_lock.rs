//! Per-key exclusive locks for cache backends.
//!
//! A key is held by the backend node, not by a thread: whoever called
//! `acquire` must call `release`, and a second `acquire` on the same key
//! blocks until then, whichever thread makes it.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

use softlock_core::{CacheError, CacheKey};

/// Set of currently held keys plus a condition variable to park waiters.
#[derive(Debug, Default)]
pub struct KeyLockTable {
    held: Mutex<HashSet<CacheKey>>,
    released: Condvar,
}

impl KeyLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free, then take it.
    pub fn acquire(&self, key: &CacheKey) -> Result<(), CacheError> {
        let mut held = self.held.lock()?;
        while held.contains(key) {
            held = self.released.wait(held)?;
        }
        held.insert(key.clone());
        Ok(())
    }

    /// Free `key` and wake waiters.
    pub fn release(&self, key: &CacheKey) -> Result<(), CacheError> {
        let mut held = self.held.lock()?;
        if !held.remove(key) {
            return Err(CacheError::KeyNotLocked {
                key: key.to_string(),
            });
        }
        self.released.notify_all();
        Ok(())
    }

    pub fn is_locked(&self, key: &CacheKey) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(key))
            .unwrap_or(false)
    }
}
