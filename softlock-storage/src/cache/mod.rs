//! Soft-lock cache layer.
//!
//! [`ReadWriteStrategy`] sits between a transactional data layer and a
//! [`CacheBackend`] and gives read-committed isolation to cached rows: no
//! transaction ever reads a value that was cached after it started, and no
//! value is cached while a writer might still be changing it.
//!
//! # Backends
//!
//! - [`InMemoryCacheBackend`]: `HashMap` store, optionally acting as a
//!   cluster node through [`ClusteredCache`]
//! - [`LmdbCacheBackend`]: persistent store on LMDB
//!
//! Both share the blocking per-key [`KeyLockTable`] and a logical clock.
//!
//! # Example
//!
//! ```ignore
//! let strategy: ReadWriteStrategy<_, Account, u64> =
//!     ReadWriteStrategy::new(backend, StrategyConfig::for_region("accounts"))?;
//!
//! // Reader: fall through to the database on a miss, then fill.
//! let tx_start = backend.next_timestamp();
//! if strategy.get(&key, tx_start)?.is_none() {
//!     let (account, version) = load(&key)?;
//!     strategy.put(&key, account, tx_start, Some(version), &u64::cmp)?;
//! }
//! ```

pub mod key_lock;
pub mod lmdb_backend;
pub mod memory;
pub mod read_write;
pub mod traits;

pub use key_lock::KeyLockTable;
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::InMemoryCacheBackend;
pub use read_write::{CacheConcurrencyStrategy, ReadWriteStrategy};
pub use traits::{CacheBackend, CacheStats, ClusteredCache};
