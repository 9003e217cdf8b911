//! Logical clock for cache freshness ordering.
//!
//! Freshness and lock-timeout comparisons never use raw wall-clock values.
//! Every timestamp comes from a [`Timestamper`], which packs wall-clock
//! milliseconds into the high bits and a per-millisecond counter into the
//! low [`Timestamper::BIN_DIGITS`] bits, so successive calls are strictly
//! increasing even within the same millisecond or when the wall clock steps
//! backwards.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;

use crate::Timestamp;

/// Monotonic logical clock.
#[derive(Debug, Default)]
pub struct Timestamper {
    last: AtomicI64,
}

impl Timestamper {
    /// Number of low bits reserved for the per-millisecond counter.
    pub const BIN_DIGITS: u32 = 12;

    /// One millisecond expressed in clock units.
    pub const ONE_MS: i64 = 1 << Self::BIN_DIGITS;

    /// Create a clock starting from the current wall-clock time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock whose first reading is strictly greater than `floor`.
    ///
    /// Useful for backends that persist timestamps and reopen later.
    pub fn starting_after(floor: Timestamp) -> Self {
        Self {
            last: AtomicI64::new(floor),
        }
    }

    /// Produce the next timestamp. Strictly greater than every previous one.
    pub fn next(&self) -> Timestamp {
        let wall = Utc::now().timestamp_millis() << Self::BIN_DIGITS;
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let candidate = if wall > current { wall } else { current + 1 };
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(observed) => current = observed,
            }
        }
    }

    /// Convert a duration into clock units.
    pub fn units(duration: Duration) -> i64 {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX >> Self::BIN_DIGITS);
        millis.saturating_mul(Self::ONE_MS)
    }

    /// The most recently issued timestamp (zero if none yet).
    pub fn last(&self) -> Timestamp {
        self.last.load(Ordering::Acquire)
    }
}
