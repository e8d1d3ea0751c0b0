//! Integration tests for the result cache: bounds, eviction order, expiry
//! and the distributed tier.

use std::sync::Arc;
use std::time::Duration;

use cellgate::{
    BackgroundTasks, CellValue, InputSet, MemoryStore, OutputResult, OutputValue, ResultCache,
    ResultCacheConfig, ServiceDefinition, SharedStore,
};

fn service() -> ServiceDefinition {
    ServiceDefinition::new("svc", "{}")
}

fn inputs(x: f64) -> InputSet {
    [("x".to_string(), CellValue::Number(x))].into_iter().collect()
}

fn outputs(y: f64) -> Vec<OutputResult> {
    vec![OutputResult {
        name: "y".to_string(),
        value: OutputValue::Scalar(CellValue::Number(y)),
        format_hint: None,
    }]
}

// =============================================================================
// Local tier
// =============================================================================

#[tokio::test]
async fn eviction_removes_exactly_the_oldest_entry() {
    let cache = ResultCache::new(ResultCacheConfig::new().max_entries(3));
    let svc = service();
    for x in 0..3 {
        cache.set(&svc, &inputs(x as f64), outputs(x as f64));
    }
    cache.set(&svc, &inputs(3.0), outputs(3.0));

    assert_eq!(cache.len(), 3);
    assert!(cache.get(&svc, &inputs(0.0)).await.is_none());
    for x in 1..=3 {
        let hit = cache.get(&svc, &inputs(x as f64)).await.unwrap();
        assert_eq!(hit.outputs, outputs(x as f64));
    }
}

#[tokio::test]
async fn size_never_exceeds_the_bound() {
    let cache = ResultCache::new(ResultCacheConfig::new().max_entries(10));
    let svc = service();
    for x in 0..250 {
        cache.set(&svc, &inputs(x as f64), outputs(x as f64));
        assert!(cache.len() <= 10);
    }
    // The most recent ten survive.
    for x in 240..250 {
        assert!(cache.get(&svc, &inputs(x as f64)).await.is_some());
    }
}

#[tokio::test]
async fn refreshed_key_moves_to_the_back() {
    let cache = ResultCache::new(ResultCacheConfig::new().max_entries(2));
    let svc = service();
    cache.set(&svc, &inputs(1.0), outputs(1.0));
    cache.set(&svc, &inputs(2.0), outputs(2.0));
    cache.set(&svc, &inputs(1.0), outputs(10.0));
    cache.set(&svc, &inputs(3.0), outputs(3.0));

    assert!(cache.get(&svc, &inputs(2.0)).await.is_none());
    assert_eq!(cache.get(&svc, &inputs(1.0)).await.unwrap().outputs, outputs(10.0));
}

#[tokio::test]
async fn entries_expire() {
    let cache = ResultCache::new(ResultCacheConfig::new().ttl(Duration::from_millis(20)));
    let svc = service();
    cache.set(&svc, &inputs(1.0), outputs(1.0));
    assert!(cache.get(&svc, &inputs(1.0)).await.is_some());

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(cache.get(&svc, &inputs(1.0)).await.is_none());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn versions_do_not_share_entries() {
    let cache = ResultCache::new(ResultCacheConfig::new());
    cache.set(&service(), &inputs(1.0), outputs(1.0));
    assert!(cache.get(&service().version(1), &inputs(1.0)).await.is_none());
}

// =============================================================================
// Distributed tier
// =============================================================================

#[tokio::test]
async fn instances_share_results_through_the_store() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let tasks = BackgroundTasks::spawn(16);
    let config = ResultCacheConfig::new().distributed(true);
    let a = ResultCache::new(config.clone()).distributed(store.clone(), tasks.clone());
    let b = ResultCache::new(config).distributed(store.clone(), tasks.clone());

    let svc = service();
    a.set(&svc, &inputs(5.0), outputs(25.0));
    tasks.drain().await;

    let hit = b.get(&svc, &inputs(5.0)).await.unwrap();
    assert_eq!(hit.outputs, outputs(25.0));
    // Promoted into b's local tier.
    assert_eq!(b.len(), 1);

    // Clearing a's local tier leaves the shared copy reachable.
    assert_eq!(a.invalidate_service("svc"), 1);
    assert!(a.get(&svc, &inputs(5.0)).await.is_some());
}

#[tokio::test]
async fn unreadable_shared_entry_is_a_miss() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let cache = ResultCache::new(ResultCacheConfig::new().distributed(true))
        .distributed(store.clone(), BackgroundTasks::spawn(4));
    let key = cellgate::cache::result_key(&service(), &inputs(1.0));
    store
        .set(&format!("result:{key}"), b"not json".to_vec(), None)
        .await
        .unwrap();

    assert!(cache.get(&service(), &inputs(1.0)).await.is_none());
}
