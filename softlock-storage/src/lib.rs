//! SOFTLOCK Storage - Cache Backends and the Read-Write Strategy
//!
//! Implements the read-committed cache concurrency strategy on top of
//! pluggable cache backends. Data types shared with callers live in
//! `softlock-core`.

pub mod cache;

pub use cache::{
    CacheBackend, CacheConcurrencyStrategy, CacheStats, ClusteredCache, InMemoryCacheBackend,
    KeyLockTable, LmdbCacheBackend, LmdbCacheError, ReadWriteStrategy,
};
