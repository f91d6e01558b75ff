//! Runs against a live Redis; `REDIS_URL` defaults to localhost.
//!
//! cargo test -p rq-store -- --ignored

use rq_core::KeySpace;
use rq_store::{QueueStore, RedisQueueStore};
use std::time::Duration;

async fn store() -> RedisQueueStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    // a fresh namespace per test keeps runs independent
    let namespace = format!("rq-test-{}", uuid::Uuid::new_v4().simple());
    let keys = KeySpace::with_namespace(&namespace).unwrap();
    RedisQueueStore::connect(&url, keys, Duration::from_secs(2))
        .await
        .unwrap()
}

#[tokio::test]
#[ignore]
async fn test_redis_reserve_acknowledge() {
    let store = store().await;
    let pending = store.keys().pending();
    let in_flight = store.keys().in_flight("w1");

    store.enqueue(&pending, "a").await.unwrap();
    store.enqueue(&pending, "b").await.unwrap();

    let first = store.reserve(&pending, &in_flight, Duration::from_secs(1)).await.unwrap();
    assert_eq!(first.as_deref(), Some("a"));
    assert_eq!(store.list_members(&in_flight).await.unwrap(), vec!["a"]);

    assert!(store.acknowledge(&in_flight, "a").await.unwrap());
    assert!(!store.acknowledge(&in_flight, "a").await.unwrap());

    let none = store.reserve(&in_flight, &pending, Duration::ZERO).await.unwrap();
    assert!(none.is_none());

    store.drain_all(&pending, &in_flight).await.unwrap();
    assert!(store.acknowledge(&in_flight, "b").await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_redis_reserve_times_out() {
    let store = store().await;
    let pending = store.keys().pending();
    let in_flight = store.keys().in_flight("w1");

    let started = std::time::Instant::now();
    let reserved = store.reserve(&pending, &in_flight, Duration::from_secs(1)).await.unwrap();

    assert!(reserved.is_none());
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
#[ignore]
async fn test_redis_heartbeat_and_membership() {
    let store = store().await;

    store.heartbeat("w1", Duration::from_secs(1)).await.unwrap();
    store.enqueue(&store.keys().in_flight("w2"), "t").await.unwrap();

    assert!(store.is_alive("w1").await.unwrap());
    let ids: Vec<_> = store.list_worker_ids().await.unwrap().into_iter().collect();
    assert_eq!(ids, vec!["w1", "w2"]);

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(!store.is_alive("w1").await.unwrap());

    store.forget_worker("w1").await.unwrap();
    let moved = store
        .drain_all(&store.keys().in_flight("w2"), &store.keys().pending())
        .await
        .unwrap();
    assert_eq!(moved, 1);
    assert!(store.list_worker_ids().await.unwrap().is_empty());

    assert!(store.acknowledge(&store.keys().pending(), "t").await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_redis_quarantine() {
    let store = store().await;
    let in_flight = store.keys().in_flight("w1");

    store.enqueue(&in_flight, "{bad").await.unwrap();
    assert!(store.quarantine(&in_flight, "{bad").await.unwrap());
    assert!(!store.quarantine(&in_flight, "{bad").await.unwrap());
    assert_eq!(store.queue_len(&store.keys().quarantine()).await.unwrap(), 1);

    store.acknowledge(&store.keys().quarantine(), "{bad").await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_redis_drains_long_in_flight_list() {
    let store = store().await;
    let pending = store.keys().pending();
    let in_flight = store.keys().in_flight("w1");

    for i in 0..50_000 {
        store.enqueue(&in_flight, &format!("task-{i}")).await.unwrap();
    }

    assert_eq!(store.drain_all(&in_flight, &pending).await.unwrap(), 50_000);
    assert_eq!(store.queue_len(&pending).await.unwrap(), 50_000);
    assert_eq!(store.queue_len(&in_flight).await.unwrap(), 0);
}
