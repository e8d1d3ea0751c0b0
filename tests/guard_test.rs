//! Per-service guard: ordering, release and isolation.

use std::sync::Arc;
use std::time::Duration;

use cellgate::ServiceGuard;

#[tokio::test]
async fn waiters_are_served_in_arrival_order() {
    let guard: Arc<ServiceGuard<Vec<u32>>> = Arc::new(ServiceGuard::new());
    let held = guard.acquire("svc").await;

    let mut handles = Vec::new();
    for i in 0..5 {
        let guard = guard.clone();
        handles.push(tokio::spawn(async move {
            guard.with_exclusive_access("svc", |order| order.push(i)).await;
        }));
        // Let the task register as a waiter before spawning the next one.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    drop(held);
    for handle in handles {
        handle.await.unwrap();
    }

    let order = guard.with_exclusive_access("svc", |order| order.clone()).await;
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn panic_inside_the_critical_section_releases_the_lock() {
    let guard: Arc<ServiceGuard> = Arc::new(ServiceGuard::new());

    let task = {
        let guard = guard.clone();
        tokio::spawn(async move {
            let _: () = guard
                .with_exclusive_access("svc", |_| panic!("engine crashed"))
                .await;
        })
    };
    assert!(task.await.unwrap_err().is_panic());

    assert!(!guard.is_locked("svc"));
    tokio::time::timeout(Duration::from_secs(1), guard.acquire("svc"))
        .await
        .expect("lock leaked after panic");
}

#[tokio::test]
async fn cancelled_waiter_does_not_block_others() {
    let guard: Arc<ServiceGuard> = Arc::new(ServiceGuard::new());
    let held = guard.acquire("svc").await;

    let abandoned = tokio::time::timeout(Duration::from_millis(10), guard.acquire("svc")).await;
    assert!(abandoned.is_err());

    drop(held);
    tokio::time::timeout(Duration::from_secs(1), guard.acquire("svc"))
        .await
        .expect("cancelled waiter kept the lock");
}

#[tokio::test]
async fn services_do_not_block_each_other() {
    let guard: ServiceGuard = ServiceGuard::new();
    let _a = guard.acquire("a").await;

    tokio::time::timeout(Duration::from_millis(100), guard.acquire("b"))
        .await
        .expect("service b waited on service a");
    assert!(guard.is_locked("a"));
    assert_eq!(guard.len(), 2);
}
