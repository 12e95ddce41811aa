//! Lock scenarios against a real store. Gated on `MSQ_TEST_REDIS_URL`, same
//! convention as `queue_integration.rs`.

use std::time::Duration;

use redis::aio::ConnectionManager;
use serial_test::serial;

use msq_common::StoreError;
use msq_store::{Lock, StoreClient};

async fn connect() -> Option<StoreClient> {
    let url = std::env::var("MSQ_TEST_REDIS_URL").ok()?;
    let client = redis::Client::open(url).ok()?;
    let manager = ConnectionManager::new(client).await.ok()?;
    Some(StoreClient::from_manager(manager))
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis; set MSQ_TEST_REDIS_URL"]
async fn try_lock_fails_while_held_then_succeeds_after_ttl_expiry() {
    let Some(store) = connect().await else {
        eprintln!("skipping: MSQ_TEST_REDIS_URL not set");
        return;
    };
    let lock = Lock::new(&store);
    let key = "msq:it:lock-try";
    let _ = lock.unlock(key, "ownerA").await;

    lock.try_lock(key, "ownerA", Duration::from_secs(1)).await.unwrap();
    assert!(matches!(
        lock.try_lock(key, "ownerB", Duration::from_secs(1)).await,
        Err(StoreError::Locked)
    ));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    lock.try_lock(key, "ownerB", Duration::from_secs(1)).await.unwrap();
    lock.unlock(key, "ownerB").await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis; set MSQ_TEST_REDIS_URL"]
async fn unlock_by_the_wrong_owner_fails_then_the_right_owner_succeeds() {
    let Some(store) = connect().await else {
        eprintln!("skipping: MSQ_TEST_REDIS_URL not set");
        return;
    };
    let lock = Lock::new(&store);
    let key = "msq:it:lock-unlock-mismatch";
    let _ = lock.unlock(key, "A").await;

    lock.lock(key, "A", Duration::from_secs(10)).await.unwrap();
    assert!(matches!(lock.unlock(key, "B").await, Err(StoreError::NotOwner)));
    lock.unlock(key, "A").await.unwrap();
    // absent key is a no-op, not an error.
    lock.unlock(key, "A").await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis; set MSQ_TEST_REDIS_URL"]
async fn zero_ttl_is_rejected_by_both_lock_and_try_lock() {
    let Some(store) = connect().await else {
        eprintln!("skipping: MSQ_TEST_REDIS_URL not set");
        return;
    };
    let lock = Lock::new(&store);
    let key = "msq:it:lock-zero-ttl";

    assert!(matches!(
        lock.try_lock(key, "A", Duration::ZERO).await,
        Err(StoreError::InvalidArgument(_))
    ));
    assert!(matches!(
        lock.lock(key, "A", Duration::ZERO).await,
        Err(StoreError::InvalidArgument(_))
    ));
}
