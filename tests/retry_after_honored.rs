//! Scenario 2 — `Retry-After` honored: upstream returns `429 Retry-After:
//! 0.1s` twice then `200`. Total elapsed must be >= 200ms and the task
//! ends up fully drained from the queue after two retries.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use change_pipeline::models::TaskKind;
use change_pipeline::queue::TaskQueue;
use change_pipeline::upstream::UpstreamError;
use change_pipeline::worker::{TaskWorker, WorkerConfig};
use common::{MockUpstreamClient, TestHarness};
use test_context::test_context;
use tokio_util::sync::CancellationToken;

#[test_context(TestHarness)]
#[tokio::test]
async fn retry_after_delays_the_next_attempt_by_at_least_the_hinted_duration(ctx: &TestHarness) {
    let queue = ctx.queue();
    let jobs = ctx.jobs();
    let cache = ctx.cache();
    let buckets = ctx.buckets(10, 1);
    let upstream = Arc::new(MockUpstreamClient::new(vec![
        Err(UpstreamError::RateLimited { retry_after: Some(Duration::from_millis(100)) }),
        Err(UpstreamError::RateLimited { retry_after: Some(Duration::from_millis(100)) }),
        Ok(serde_json::json!({"ok": true})),
    ]));
    let tokens = ctx.tokens(upstream.clone());
    ctx.insert_user("u1", "at-1", "rt-1", Duration::from_secs(3600)).await;

    queue.enqueue(TaskKind::CreateNode, serde_json::json!({"n": 1}), "u1", None, 0).await.unwrap();

    let worker = Arc::new(TaskWorker::new(queue.clone(), tokens, buckets, upstream.clone(), jobs, cache, "worker-1".into()));
    let shutdown = CancellationToken::new();
    let start = Instant::now();
    let handle = tokio::spawn(worker.run(WorkerConfig::default(), shutdown.clone()));

    let done = ctx.wait_for(Duration::from_secs(5), || async { queue.queue_length().await.unwrap_or(1) == 0 }).await;
    let elapsed = start.elapsed();
    shutdown.cancel();
    let _ = handle.await;

    assert!(done, "task never drained from the queue");
    assert!(elapsed >= Duration::from_millis(200), "only {elapsed:?} elapsed, expected >= 200ms");
    assert_eq!(upstream.apply_call_timestamps().len(), 3);
}
