//! Connection pool reuse, expiry and capacity

use sluice::proxy::pool::{Pool, PoolConfig, PoolError};
use std::sync::Arc;
use std::time::Duration;

fn pool(max: usize) -> Pool<u32> {
    Pool::new(PoolConfig {
        max_connections: max,
        max_idle_duration: Duration::from_secs(10),
        max_lifetime: Duration::from_secs(60),
    })
}

const WAIT: Duration = Duration::from_millis(100);

#[tokio::test(start_paused = true)]
async fn test_released_connection_is_reused() {
    let pool = pool(4);

    let mut lease = pool.acquire(WAIT).await.unwrap();
    assert!(!lease.is_reused());
    assert!(lease.conn_mut().is_none());
    lease.attach(7);
    lease.release();

    assert_eq!(pool.idle_count(), 1);
    assert_eq!(pool.open_count(), 1);

    let mut again = pool.acquire(WAIT).await.unwrap();
    assert!(again.is_reused());
    assert_eq!(again.conn_mut().copied(), Some(7));
    assert_eq!(pool.idle_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_most_recently_released_goes_first() {
    let pool = pool(4);

    let mut first = pool.acquire(WAIT).await.unwrap();
    let mut second = pool.acquire(WAIT).await.unwrap();
    first.attach(1);
    second.attach(2);
    first.release();
    second.release();

    let mut lease = pool.acquire(WAIT).await.unwrap();
    assert_eq!(lease.conn_mut().copied(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_lease_frees_its_slot() {
    let pool = pool(1);

    let mut lease = pool.acquire(WAIT).await.unwrap();
    lease.attach(1);
    drop(lease);

    assert_eq!(pool.open_count(), 0);
    assert_eq!(pool.idle_count(), 0);
    assert!(pool.acquire(WAIT).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_idle_connection_expires() {
    let pool = pool(4);

    let mut lease = pool.acquire(WAIT).await.unwrap();
    lease.attach(1);
    lease.release();

    tokio::time::advance(Duration::from_secs(10)).await;

    let lease = pool.acquire(WAIT).await.unwrap();
    assert!(!lease.is_reused());
    assert_eq!(pool.idle_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_evict_expired_keeps_fresh_connections() {
    let pool = pool(4);

    let mut old = pool.acquire(WAIT).await.unwrap();
    old.attach(1);
    old.release();
    tokio::time::advance(Duration::from_secs(6)).await;

    let mut fresh = pool.acquire_vacant(WAIT).await.unwrap();
    fresh.attach(2);
    fresh.release();
    tokio::time::advance(Duration::from_secs(5)).await;

    assert_eq!(pool.evict_expired(), 1);
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(pool.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_past_lifetime_is_not_pooled() {
    let pool = pool(4);

    let mut lease = pool.acquire(WAIT).await.unwrap();
    lease.attach(1);
    tokio::time::advance(Duration::from_secs(60)).await;
    lease.release();

    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_full_pool_reports_exhausted() {
    let pool = pool(1);

    let _held = pool.acquire(WAIT).await.unwrap();

    assert_eq!(pool.acquire(WAIT).await.err(), Some(PoolError::Exhausted));
}

#[tokio::test(start_paused = true)]
async fn test_waiter_gets_released_connection() {
    let pool = Arc::new(pool(1));

    let mut held = pool.acquire(WAIT).await.unwrap();
    held.attach(42);

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move {
            let mut lease = pool.acquire(Duration::from_secs(5)).await.unwrap();
            (lease.is_reused(), lease.conn_mut().copied())
        }
    });

    tokio::task::yield_now().await;
    held.release();

    assert_eq!(waiter.await.unwrap(), (true, Some(42)));
}

#[tokio::test(start_paused = true)]
async fn test_acquire_vacant_never_reuses() {
    let pool = pool(4);

    let mut lease = pool.acquire(WAIT).await.unwrap();
    lease.attach(1);
    lease.release();

    let vacant = pool.acquire_vacant(WAIT).await.unwrap();
    assert!(!vacant.is_reused());
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(pool.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_vacant_displaces_oldest_idle_when_full() {
    let pool = pool(2);

    for conn in [1, 2] {
        let mut lease = pool.acquire_vacant(WAIT).await.unwrap();
        lease.attach(conn);
        lease.release();
    }
    assert_eq!(pool.idle_count(), 2);

    let mut vacant = pool.acquire_vacant(WAIT).await.unwrap();
    vacant.attach(3);
    vacant.release();

    assert_eq!(pool.open_count(), 2);
    let mut drained = pool.drain_idle();
    drained.sort_unstable();
    assert_eq!(drained, vec![2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_drain_idle_leaves_leased_alone() {
    let pool = pool(4);

    let mut idle = pool.acquire(WAIT).await.unwrap();
    idle.attach(1);
    idle.release();
    let mut leased = pool.acquire_vacant(WAIT).await.unwrap();
    leased.attach(2);

    assert_eq!(pool.drain_idle(), vec![1]);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.open_count(), 1);

    leased.release();
    assert_eq!(pool.idle_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_discarded_connection_keeps_its_slot() {
    let pool = pool(1);

    let mut lease = pool.acquire(WAIT).await.unwrap();
    lease.attach(1);
    lease.release();

    let mut reused = pool.acquire(WAIT).await.unwrap();
    assert!(reused.is_reused());
    reused.discard();

    assert!(!reused.is_reused());
    assert!(reused.conn_mut().is_none());
    assert_eq!(pool.open_count(), 1);

    reused.attach(2);
    reused.release();
    assert_eq!(pool.acquire(WAIT).await.unwrap().conn_mut().copied(), Some(2));
}
