// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn incr_counts_within_the_window() {
    let kv = MemoryKv::new();
    assert_eq!(
        kv.incr_with_ttl("ip:1.2.3.4", Duration::from_secs(60))
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        kv.incr_with_ttl("ip:1.2.3.4", Duration::from_secs(60))
            .await
            .unwrap(),
        2
    );
    // Separate keys count separately
    assert_eq!(
        kv.incr_with_ttl("ip:5.6.7.8", Duration::from_secs(60))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn counter_resets_after_ttl() {
    let kv = MemoryKv::new();
    kv.incr_with_ttl("k", Duration::from_millis(20)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(
        kv.incr_with_ttl("k", Duration::from_secs(60)).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn get_or_put_returns_the_first_value() {
    let kv = MemoryKv::new();
    let first = kv
        .get_or_put("op-42", Duration::from_secs(60), "build-a".into())
        .await
        .unwrap();
    assert_eq!(first, "build-a");

    let second = kv
        .get_or_put("op-42", Duration::from_secs(60), "build-b".into())
        .await
        .unwrap();
    assert_eq!(second, "build-a");
}

#[tokio::test]
async fn lease_is_exclusive_until_released() {
    let kv = MemoryKv::new();
    assert!(kv.acquire("rollback:p1", Duration::from_secs(30)).await.unwrap());
    assert!(!kv.acquire("rollback:p1", Duration::from_secs(30)).await.unwrap());

    kv.release("rollback:p1").await.unwrap();
    assert!(kv.acquire("rollback:p1", Duration::from_secs(30)).await.unwrap());
}

#[tokio::test]
async fn renew_extends_a_held_lease_only() {
    let kv = MemoryKv::new();
    assert!(!kv.renew("rollback:p1", Duration::from_secs(30)).await.unwrap());

    kv.acquire("rollback:p1", Duration::from_millis(30)).await.unwrap();
    assert!(kv.renew("rollback:p1", Duration::from_secs(30)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(60)).await;
    // Renewed past the original expiry
    assert!(!kv.acquire("rollback:p1", Duration::from_secs(30)).await.unwrap());
}

#[tokio::test]
async fn expired_lease_can_be_taken_over() {
    let kv = MemoryKv::new();
    kv.acquire("rollback:p1", Duration::from_millis(20)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(kv.acquire("rollback:p1", Duration::from_secs(30)).await.unwrap());
}

#[tokio::test]
async fn outage_surfaces_as_unavailable() {
    let kv = MemoryKv::new();
    kv.set_unavailable(true);
    assert!(kv
        .incr_with_ttl("k", Duration::from_secs(1))
        .await
        .is_err());
    kv.set_unavailable(false);
    assert!(kv.incr_with_ttl("k", Duration::from_secs(1)).await.is_ok());
}
