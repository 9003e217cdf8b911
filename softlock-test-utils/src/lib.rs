//! SOFTLOCK Test Utilities
//!
//! Centralized test infrastructure for the SOFTLOCK workspace:
//! - Proptest generators for keys, soft-lock slots and configuration
//! - Test fixtures for common strategy and backend setups
//! - Custom assertions for SOFTLOCK-specific validation

// Re-export core types for convenience
pub use softlock_core::{
    CacheError, CacheKey, ConfigError, Item, Lock, LockId, Lockable, RegionId, SoftlockError,
    SoftlockResult, StrategyConfig, Timestamp, Timestamper,
};
pub use softlock_storage::{
    CacheBackend, CacheConcurrencyStrategy, CacheStats, ClusteredCache, InMemoryCacheBackend,
    ReadWriteStrategy,
};

use std::cmp::Ordering;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Backend type used by most fixtures.
pub type TestBackend = InMemoryCacheBackend<String, u64>;

/// Strategy type used by most fixtures.
pub type TestStrategy = ReadWriteStrategy<TestBackend, String, u64>;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating SOFTLOCK types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_region_id() -> impl Strategy<Value = RegionId> {
        any::<u16>().prop_map(RegionId)
    }

    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        (arb_uuid(), arb_region_id(), arb_uuid())
            .prop_map(|(tenant, region, entity)| CacheKey::new(tenant, region, entity))
    }

    /// Timestamps in the range a [`Timestamper`] actually produces.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        0i64..(1i64 << 55)
    }

    pub fn arb_version() -> impl Strategy<Value = Option<u64>> {
        proptest::option::of(0u64..1_000)
    }

    pub fn arb_item() -> impl Strategy<Value = Item<String, u64>> {
        ("[a-z]{1,12}", arb_version(), arb_timestamp())
            .prop_map(|(value, version, fresh)| Item::new(value, version, fresh))
    }

    /// A lock that went through some number of joins and releases.
    pub fn arb_lock() -> impl Strategy<Value = Lock<u64>> {
        (arb_timestamp(), any::<LockId>(), arb_version(), 0u32..4)
            .prop_flat_map(|(timeout, id, version, relocks)| {
                (
                    Just(timeout),
                    Just(id),
                    Just(version),
                    Just(relocks),
                    0..=relocks + 1,
                    arb_timestamp(),
                )
            })
            .prop_map(|(timeout, id, version, relocks, unlocks, unlock_at)| {
                let mut lock = Lock::new(timeout, id, version);
                for _ in 0..relocks {
                    lock = lock.relock(timeout);
                }
                for _ in 0..unlocks {
                    lock = lock.unlock(unlock_at);
                }
                lock
            })
    }

    pub fn arb_lockable() -> impl Strategy<Value = Lockable<String, u64>> {
        prop_oneof![
            arb_item().prop_map(|item| Lockable::from(item)),
            arb_lock().prop_map(|lock| Lockable::from(lock)),
        ]
    }

    /// Generate a StrategyConfig that passes validation.
    pub fn arb_valid_config() -> impl Strategy<Value = StrategyConfig> {
        ("[a-z][a-z_]{0,15}", 1u64..600_000).prop_map(|(region, millis)| {
            StrategyConfig::for_region(region).with_lock_timeout(Duration::from_millis(millis))
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    pub const TEST_REGION: &str = "accounts";

    /// Create a minimal valid StrategyConfig for testing.
    pub fn test_config() -> StrategyConfig {
        StrategyConfig::for_region(TEST_REGION).with_lock_timeout(Duration::from_secs(30))
    }

    pub fn test_key() -> CacheKey {
        CacheKey::new(Uuid::now_v7(), RegionId(1), Uuid::now_v7())
    }

    pub fn memory_backend() -> Arc<TestBackend> {
        Arc::new(InMemoryCacheBackend::new(test_config().lock_timeout))
    }

    /// Backend acting as a cluster node: normal puts are announced.
    pub fn clustered_backend() -> Arc<TestBackend> {
        Arc::new(InMemoryCacheBackend::clustered(test_config().lock_timeout))
    }

    /// Build a strategy in front of `backend`. Several strategies over the
    /// same backend behave like nodes sharing one distributed cache.
    pub fn strategy_over(backend: &Arc<TestBackend>) -> TestStrategy {
        match ReadWriteStrategy::new(Arc::clone(backend), test_config()) {
            Ok(strategy) => strategy,
            Err(e) => panic!("test config must be valid: {e}"),
        }
    }

    pub fn memory_strategy() -> (TestStrategy, Arc<TestBackend>) {
        let backend = memory_backend();
        (strategy_over(&backend), backend)
    }

    /// Natural order on `u64` versions.
    pub fn by_version(a: &u64, b: &u64) -> Ordering {
        a.cmp(b)
    }

    /// Current slot for `key`, read without touching hit/miss counters.
    pub fn slot_at(backend: &TestBackend, key: &CacheKey) -> Option<Lockable<String, u64>> {
        match backend.get_quiet(key) {
            Ok(slot) => slot,
            Err(e) => panic!("quiet read failed: {e}"),
        }
    }

    /// Route `tracing` output to the test harness. Honors `RUST_LOG`.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for SOFTLOCK-specific validation.

    use super::*;

    /// Assert that a SoftlockResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: Debug>(result: &SoftlockResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a SoftlockResult is Err.
    #[track_caller]
    pub fn assert_err<T: Debug>(result: &SoftlockResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    #[track_caller]
    pub fn assert_cache_error<T: Debug>(result: &SoftlockResult<T>) {
        match result {
            Err(SoftlockError::Cache(_)) => {}
            other => panic!("Expected Cache error, got: {:?}", other),
        }
    }

    /// Assert that a SoftlockResult is a backend I/O failure.
    #[track_caller]
    pub fn assert_backend_error<T: Debug>(result: &SoftlockResult<T>) {
        match result {
            Err(SoftlockError::Cache(CacheError::Backend { .. })) => {}
            other => panic!("Expected Backend error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: Debug>(result: &SoftlockResult<T>) {
        match result {
            Err(SoftlockError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_minimal_puts_rejected<T: Debug>(result: &SoftlockResult<T>) {
        match result {
            Err(SoftlockError::Config(ConfigError::MinimalPutsUnsupported { .. })) => {}
            other => panic!("Expected MinimalPutsUnsupported, got: {:?}", other),
        }
    }

    /// Assert that the slot holds an item with `expected` as its value.
    #[track_caller]
    pub fn assert_item<V, Ver>(slot: &Option<Lockable<V, Ver>>, expected: &V) -> Item<V, Ver>
    where
        V: Clone + Debug + PartialEq,
        Ver: Clone + Debug,
    {
        match slot {
            Some(Lockable::Item(item)) => {
                assert_eq!(item.value(), expected, "Cached value mismatch");
                item.clone()
            }
            other => panic!("Expected cached item {:?}, got: {:?}", expected, other),
        }
    }

    /// Assert that the slot holds a lock with `multiplicity` outstanding
    /// holders, and return it.
    #[track_caller]
    pub fn assert_lock<V, Ver>(slot: &Option<Lockable<V, Ver>>, multiplicity: u32) -> Lock<Ver>
    where
        V: Debug,
        Ver: Clone + Debug,
    {
        match slot {
            Some(Lockable::Lock(lock)) => {
                assert_eq!(lock.multiplicity(), multiplicity, "Lock multiplicity mismatch");
                assert_eq!(
                    lock.unlock_timestamp().is_some(),
                    multiplicity == 0,
                    "Unlock timestamp must be set exactly when the last holder releases"
                );
                lock.clone()
            }
            other => panic!("Expected lock with multiplicity {}, got: {:?}", multiplicity, other),
        }
    }

    /// Assert that every holder has released the lock in the slot.
    #[track_caller]
    pub fn assert_released<V: Debug, Ver: Clone + Debug>(slot: &Option<Lockable<V, Ver>>) {
        assert_lock(slot, 0);
    }

    #[track_caller]
    pub fn assert_config_valid(config: &StrategyConfig) {
        if let Err(e) = config.validate() {
            panic!("Config should be valid, got: {e}");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
