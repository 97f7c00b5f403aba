//! Scenario 1 — rate-limit respect: `reservoir=1, interval=50ms`, three
//! `CreateNode` tasks for one user. Consecutive upstream calls must be
//! spaced by at least the refill interval.

mod common;

use std::sync::Arc;
use std::time::Duration;

use change_pipeline::models::TaskKind;
use change_pipeline::queue::TaskQueue;
use change_pipeline::worker::{TaskWorker, WorkerConfig};
use common::{MockUpstreamClient, TestHarness};
use test_context::test_context;
use tokio_util::sync::CancellationToken;

#[test_context(TestHarness)]
#[tokio::test]
async fn consecutive_upstream_calls_are_spaced_by_the_refill_interval(ctx: &TestHarness) {
    let queue = ctx.queue();
    let jobs = ctx.jobs();
    let cache = ctx.cache();
    let buckets = ctx.buckets(1, 50);
    let upstream = Arc::new(MockUpstreamClient::always_ok());
    let tokens = ctx.tokens(upstream.clone());
    ctx.insert_user("u1", "at-1", "rt-1", Duration::from_secs(3600)).await;

    for i in 0..3 {
        queue.enqueue(TaskKind::CreateNode, serde_json::json!({"n": i}), "u1", None, i).await.unwrap();
    }

    let worker = Arc::new(TaskWorker::new(queue.clone(), tokens, buckets, upstream.clone(), jobs, cache, "worker-1".into()));
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(WorkerConfig::default(), shutdown.clone()));

    let done = ctx.wait_for(Duration::from_secs(2), || async { upstream.apply_call_timestamps().len() >= 3 }).await;
    shutdown.cancel();
    let _ = handle.await;
    assert!(done, "expected three upstream calls to have been made");

    let timestamps = upstream.apply_call_timestamps();
    for pair in timestamps.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(gap >= Duration::from_millis(45), "consecutive calls were only {gap:?} apart");
    }
}
