//! Concurrent use of one cache from many tasks.

use std::sync::Arc;

use dictcache::{DictCache, ExactFilter};
use serde_json::json;
use tokio::task::JoinSet;

fn catalog(prefix: &str, n: usize) -> Vec<serde_json::Value> {
    (0..n)
        .map(|i| {
            json!({
                "itemCode": format!("{prefix}-{i:03}"),
                "itemName": format!("{prefix} entry {i:03}"),
                "parity": if i % 2 == 0 { "even" } else { "odd" },
            })
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_searches_see_identical_results() {
    let cache = Arc::new(DictCache::in_memory());
    for db in ["one", "two", "three"] {
        cache.store(db).load(None, catalog(db, 40)).await.unwrap();
    }

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let cache = Arc::clone(&cache);
        tasks.spawn(async move { cache.stores(["three", "one", "two"]).search("entry").await });
    }

    let mut results = Vec::new();
    while let Some(result) = tasks.join_next().await {
        results.push(result.unwrap());
    }
    let first = &results[0];
    assert_eq!(first.records.len(), 120);
    assert_eq!(first.records[0].origin, "three");
    assert_eq!(first.records[119].origin, "two");
    assert!(results.iter().all(|r| r == first));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handles_with_different_filters_run_side_by_side() {
    let cache = Arc::new(DictCache::in_memory());
    cache.store("db").load(None, catalog("db", 10)).await.unwrap();

    let base = cache.store("db");
    let even = base
        .clone()
        .where_exact(ExactFilter::new().with("parity", "even"));
    let odd = base
        .clone()
        .where_exact(ExactFilter::new().with("parity", "odd"));

    let even_task = tokio::spawn(async move { even.query(None, false).await });
    let odd_task = tokio::spawn(async move { odd.query(None, false).await });
    let (even, odd) = (even_task.await.unwrap(), odd_task.await.unwrap());

    assert_eq!(even.records.len(), 5);
    assert_eq!(odd.records.len(), 5);
    assert!(even.records.iter().all(|h| h.payload["parity"] == "even"));
    assert!(odd.records.iter().all(|h| h.payload["parity"] == "odd"));
    assert_eq!(base.query(None, false).await.records.len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn loads_into_separate_databases_do_not_interfere() {
    let cache = Arc::new(DictCache::in_memory());

    let mut tasks = JoinSet::new();
    for i in 0..8 {
        let cache = Arc::clone(&cache);
        tasks.spawn(async move {
            let name = format!("db{i}");
            cache.store(name.as_str()).load(None, catalog(&name, i + 1)).await
        });
    }
    while let Some(outcome) = tasks.join_next().await {
        outcome.unwrap().unwrap();
    }

    let names: Vec<String> = (0..8).map(|i| format!("db{i}")).collect();
    let result = cache.stores(names).search("entry").await;
    assert_eq!(result.records.len(), (1..=8).sum::<usize>());
    assert!(result.failures.is_empty());
}
