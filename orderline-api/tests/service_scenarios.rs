//! OrderService behaviour over the mock store: cache-aside reads,
//! write-through writes and TTL-driven repopulation.

use std::sync::Arc;
use std::time::Duration;

use orderline_api::{CreateOutcome, OrderService};
use orderline_core::{OrderError, StorageError};
use orderline_storage::{BoundedCache, CacheConfig, MockOrderStore};
use orderline_test_utils::sample_order;

const TTL: Duration = Duration::from_secs(60);

fn setup() -> (MockOrderStore, OrderService) {
    let store = MockOrderStore::new();
    let cache = Arc::new(BoundedCache::new(CacheConfig::default().with_ttl(TTL)));
    let service = OrderService::new(Arc::new(store.clone()), cache);
    (store, service)
}

#[tokio::test(start_paused = true)]
async fn end_to_end_create_read_expire_repopulate() {
    let (store, service) = setup();
    let order = sample_order("A1", 2);

    assert_eq!(
        service.create(order.clone()).await.unwrap(),
        CreateOutcome::Created
    );

    // served from cache with identical fields
    let cached = service.get_by_id("A1").await.unwrap();
    assert_eq!(*cached, order);
    assert_eq!(cached.items.len(), 2);
    assert_eq!(store.get_calls(), 0);

    tokio::time::advance(TTL + Duration::from_millis(1)).await;

    // expired: one store read, cache repopulated
    let reloaded = service.get_by_id("A1").await.unwrap();
    assert_eq!(*reloaded, order);
    assert_eq!(store.get_calls(), 1);

    // served from cache again
    service.get_by_id("A1").await.unwrap();
    assert_eq!(store.get_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn entry_is_served_until_just_before_ttl() {
    let (store, service) = setup();
    service.create(sample_order("A1", 1)).await.unwrap();

    tokio::time::advance(TTL - Duration::from_millis(1)).await;
    service.get_by_id("A1").await.unwrap();
    assert_eq!(store.get_calls(), 0);
}

#[tokio::test]
async fn failed_persist_leaves_cache_and_store_empty() {
    let (store, service) = setup();
    store.fail_creates(
        StorageError::TransactionFailed {
            reason: "serialization failure".to_string(),
        },
        1,
    );

    let err = service.create(sample_order("A1", 2)).await.unwrap_err();
    assert!(matches!(err, OrderError::PersistenceFailed(_)));
    assert!(service.cache().get("A1").is_none());

    let err = service.get_by_id("A1").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.get_calls(), 1);
}

#[tokio::test]
async fn cold_read_populates_cache() {
    let (store, service) = setup();
    store.seed(sample_order("B7", 3));

    let first = service.get_by_id("B7").await.unwrap();
    let second = service.get_by_id("B7").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.get_calls(), 1);
    let stats = service.cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn store_failure_on_read_is_persistence_failed_and_not_cached() {
    let (store, service) = setup();
    store.seed(sample_order("A1", 1));
    store.fail_reads(
        StorageError::Unavailable {
            reason: "pool timed out".to_string(),
        },
        1,
    );

    let err = service.get_by_id("A1").await.unwrap_err();
    assert!(matches!(err, OrderError::PersistenceFailed(_)));
    assert!(service.cache().is_empty());

    // next read goes through
    assert!(service.get_by_id("A1").await.is_ok());
    assert_eq!(store.get_calls(), 2);
}

#[tokio::test]
async fn not_found_is_not_cached() {
    let (store, service) = setup();

    assert!(service.get_by_id("ghost").await.unwrap_err().is_not_found());
    assert!(service.get_by_id("ghost").await.unwrap_err().is_not_found());
    assert_eq!(store.get_calls(), 2);
}

#[tokio::test]
async fn redelivered_order_is_already_exists() {
    let (store, service) = setup();
    let order = sample_order("A1", 1);

    service.create(order.clone()).await.unwrap();
    let outcome = service.create(order).await.unwrap();

    assert_eq!(outcome, CreateOutcome::AlreadyExists);
    assert_eq!(store.order_count(), 1);
    assert_eq!(store.create_calls(), 2);
}

#[tokio::test]
async fn warm_cache_failure_leaves_cache_cold() {
    let (store, service) = setup();
    store.seed(sample_order("A1", 1));
    store.fail_reads(
        StorageError::Unavailable {
            reason: "connection refused".to_string(),
        },
        1,
    );

    assert!(service.warm_cache().await.is_err());
    assert!(service.cache().is_empty());
    assert_eq!(service.warm_cache().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_and_writers() {
    let (store, service) = setup();
    for i in 0..20 {
        store.seed(sample_order(&format!("seed-{}", i), 1));
    }

    let mut handles = Vec::new();
    for task in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..20 {
                if task % 2 == 0 {
                    service.get_by_id(&format!("seed-{}", i)).await.unwrap();
                } else {
                    let uid = format!("new-{}-{}", task, i);
                    service.create(sample_order(&uid, 1)).await.unwrap();
                    assert_eq!(service.get_by_id(&uid).await.unwrap().order_uid, uid);
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.order_count(), 20 + 4 * 20);
}
