//! SOFTLOCK Core - Entity Types
//!
//! Pure data structures shared by every SOFTLOCK crate: the soft-lock state
//! machine stored in cache slots, cache keys, the logical clock, errors and
//! configuration. Strategy logic and cache backends live in
//! `softlock-storage`.

pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod lockable;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Logical timestamp issued by a [`Timestamper`]. Only comparable with other
/// timestamps from the same clock.
pub type Timestamp = i64;

/// Soft-lock identifier, unique per strategy instance until the counter wraps.
pub type LockId = i32;

pub use clock::Timestamper;
pub use config::{StrategyConfig, DEFAULT_LOCK_TIMEOUT};
pub use error::{CacheError, ConfigError, SoftlockError, SoftlockResult};
pub use key::{CacheKey, RegionId, ENCODED_KEY_LEN};
pub use lockable::{Item, Lock, Lockable, UNLOCK_PENDING};
