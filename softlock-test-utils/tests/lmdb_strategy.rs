//! The read-write strategy over the persistent LMDB backend.

use std::sync::Arc;
use std::time::Duration;

use softlock_storage::LmdbCacheBackend;
use softlock_test_utils::fixtures::{by_version, test_config, test_key};
use softlock_test_utils::{CacheBackend, CacheConcurrencyStrategy, ReadWriteStrategy};
use tempfile::TempDir;

type LmdbStrategy = ReadWriteStrategy<LmdbCacheBackend, String, u64>;

fn open(dir: &TempDir) -> (LmdbStrategy, Arc<LmdbCacheBackend>) {
    let backend = Arc::new(
        LmdbCacheBackend::new(dir.path(), 10, Duration::from_secs(30))
            .expect("backend creation should succeed"),
    );
    let strategy = ReadWriteStrategy::new(Arc::clone(&backend), test_config())
        .expect("strategy creation should succeed");
    (strategy, backend)
}

fn next_tx(backend: &LmdbCacheBackend) -> i64 {
    CacheBackend::<String, u64>::next_timestamp(backend)
}

#[test]
fn write_cycle_round_trips_through_lmdb() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let (strategy, backend) = open(&dir);
    let key = test_key();

    assert!(strategy
        .after_insert(&key, "v1".to_string(), Some(1))
        .expect("after_insert should succeed"));
    let token = strategy.lock(&key, Some(1)).expect("lock should succeed");
    assert_eq!(token.version(), Some(&1));
    assert_eq!(strategy.get(&key, next_tx(&backend)).expect("get"), None);

    assert!(strategy
        .after_update(&key, "v2".to_string(), Some(2), &token)
        .expect("after_update should succeed"));
    assert_eq!(
        strategy.get(&key, next_tx(&backend)).expect("get"),
        Some("v2".to_string())
    );
    assert!(!strategy
        .put(&key, "v1 again".to_string(), 0, Some(1), &by_version)
        .expect("put should succeed"));
}

#[test]
fn outstanding_lock_survives_restart() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let key = test_key();
    let token = {
        let (strategy, _backend) = open(&dir);
        strategy
            .after_insert(&key, "v1".to_string(), Some(1))
            .expect("after_insert should succeed");
        strategy.lock(&key, Some(1)).expect("lock should succeed")
    };

    let (strategy, backend) = open(&dir);
    assert_eq!(strategy.get(&key, next_tx(&backend)).expect("get"), None);
    assert!(!strategy
        .put(&key, "reloaded".to_string(), 0, Some(9), &by_version)
        .expect("put should succeed"));

    // Lock ids restart with the strategy, so the old token still matches.
    strategy.release(&key, &token).expect("release should succeed");
    let slot = CacheBackend::<String, u64>::get(backend.as_ref(), &key)
        .expect("get should succeed")
        .and_then(|slot| slot.as_lock().cloned())
        .expect("slot should hold a lock");
    assert!(slot.is_released());
    assert_eq!(slot.id(), token.id());
}

#[test]
fn destroy_syncs_without_panicking_twice() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let (strategy, backend) = open(&dir);

    strategy.destroy();
    assert!(backend.is_destroyed());
    strategy.destroy();
}
