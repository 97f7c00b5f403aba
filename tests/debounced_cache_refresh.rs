//! Scenario 6 — debounced cache refresh: ten refresh schedules for the same
//! board within a 100ms burst must coalesce into a single upstream fetch
//! and a single persisted cache entry once the quiet period elapses.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::TestHarness;
use test_context::test_context;

#[test_context(TestHarness)]
#[tokio::test]
async fn bursts_of_refreshes_coalesce_into_one_fetch(ctx: &TestHarness) {
    let cache = ctx.cache();
    let fetch_calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let fetch_calls = fetch_calls.clone();
        cache.schedule_refresh("b1".to_string(), async move {
            fetch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"board_id": "b1", "items": []}))
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let done = ctx.wait_for(Duration::from_secs(2), || async { cache.get("b1").await.unwrap().is_some() }).await;
    assert!(done, "cache entry should have been written after the debounce window");

    assert_eq!(fetch_calls.load(Ordering::SeqCst), 1, "burst of refreshes should coalesce into one fetch");

    let snapshot = cache.get("b1").await.unwrap().expect("cache entry should exist");
    assert_eq!(snapshot["board_id"], "b1");
}
