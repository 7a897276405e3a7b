//! PostgreSQL-backed store and message log tests.
//!
//! Run with `--features db-tests` against a database configured through the
//! `ORDERLINE_DB_*` variables.

#![cfg(feature = "db-tests")]

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use orderline_api::{AppConfig, OrderService, PgMessageLog, PgOrderStore};
use orderline_core::StorageError;
use orderline_events::{IngestionLoop, MessageSource, Position};
use orderline_storage::{BoundedCache, CacheConfig, OrderStore};
use orderline_test_utils::{sample_order, sample_payload};
use tokio::sync::watch;

fn unique(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{}", prefix, nanos)
}

async fn pool() -> deadpool_postgres::Pool {
    let config = AppConfig::from_env().expect("db config");
    config.database.create_pool().expect("pool")
}

async fn store() -> PgOrderStore {
    let store = PgOrderStore::new(pool().await);
    store.ensure_schema().await.expect("schema");
    store
}

#[tokio::test]
async fn create_then_get_round_trips_the_aggregate() {
    let store = store().await;
    let uid = unique("db-get");
    let order = sample_order(&uid, 3);

    store.create(&order).await.unwrap();
    let loaded = store.get(&uid).await.unwrap();

    assert_eq!(loaded, order);
}

#[tokio::test]
async fn duplicate_create_is_conflict() {
    let store = store().await;
    let uid = unique("db-dup");
    let order = sample_order(&uid, 1);

    store.create(&order).await.unwrap();
    let err = store.create(&order).await.unwrap_err();

    assert_eq!(err, StorageError::Conflict { order_uid: uid });
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let store = store().await;
    let err = store.get(&unique("db-missing")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn failed_transaction_persists_nothing() {
    let store = store().await;
    let uid = unique("db-atomic");
    let mut order = sample_order(&uid, 2);
    // NUL bytes are rejected by TEXT columns, failing the item insert
    order.items[1].brand = "bad\0brand".to_string();

    assert!(store.create(&order).await.is_err());
    assert!(store.get(&uid).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn get_all_includes_items() {
    let store = store().await;
    let uid = unique("db-all");
    store.create(&sample_order(&uid, 2)).await.unwrap();

    let all = store.get_all().await.unwrap();
    let found = all.iter().find(|o| o.order_uid == uid).unwrap();
    assert_eq!(found.items.len(), 2);
    assert!(store.health_check().await.is_ok());
}

#[tokio::test]
async fn message_log_resumes_after_committed_position() {
    let log = PgMessageLog::new(pool().await, Duration::from_millis(20));
    log.ensure_schema().await.unwrap();
    let partition = (SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default()
        % 1_000_000) as i32
        + 1000;
    let group = unique("group");

    let first = log.publish(partition, b"one").await.unwrap();
    let second = log.publish(partition, b"two").await.unwrap();
    assert_eq!(second.offset, first.offset + 1);

    let mut consumer = log.consumer(group.clone(), &[partition]).await.unwrap();
    let message = consumer.fetch().await.unwrap();
    assert_eq!(message.payload, b"one");
    consumer.commit(message.position).await.unwrap();
    // an earlier commit never moves the position back
    consumer
        .commit(Position::new(partition, first.offset - 1))
        .await
        .unwrap();

    let mut restarted = log.consumer(group.clone(), &[partition]).await.unwrap();
    let message = restarted.fetch().await.unwrap();
    assert_eq!(message.payload, b"two");
    assert_eq!(log.committed(&group, partition).await.unwrap(), Some(first.offset));
}

#[tokio::test]
async fn ingestion_over_postgres() {
    let pool = pool().await;
    let store = PgOrderStore::new(pool.clone());
    store.ensure_schema().await.unwrap();
    let log = PgMessageLog::new(pool, Duration::from_millis(20));
    log.ensure_schema().await.unwrap();

    let partition = 999;
    let group = unique("ingest");
    let uid = unique("db-ingest");
    let position = log.publish(partition, &sample_payload(&uid, 1)).await.unwrap();

    let cache = Arc::new(BoundedCache::new(CacheConfig::default()));
    let service = OrderService::new(Arc::new(store.clone()), cache);
    let consumer = log.consumer(group.clone(), &[partition]).await.unwrap();
    let config = orderline_events::IngestConfig::default()
        .with_group(group.clone())
        .with_partitions(vec![partition]);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(
        IngestionLoop::new(consumer, Arc::new(service.clone()), config).run(shutdown_rx),
    );

    let mut committed = None;
    for _ in 0..100 {
        committed = log.committed(&group, partition).await.unwrap();
        if committed >= Some(position.offset) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    assert!(committed >= Some(position.offset));
    assert_eq!(service.get_by_id(&uid).await.unwrap().order_uid, uid);
}
