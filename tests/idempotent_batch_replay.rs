//! Scenario 4 — idempotent batch replay: a second `POST /api/batch` with
//! the same `Idempotency-Key` but an altered body must return the exact
//! response the first request produced, without enqueuing new tasks.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use change_pipeline::queue::TaskQueue;
use change_pipeline::{http::build_app, Kernel};
use common::TestHarness;
use test_context::test_context;
use tower::ServiceExt;

#[test_context(TestHarness)]
#[tokio::test]
async fn replayed_request_returns_the_first_response_byte_identical(ctx: &TestHarness) {
    let config = ctx.config();
    // No worker is spawned in this test, so the real `HttpUpstreamClient`
    // built here is never invoked — batch submission only enqueues tasks.
    let kernel = Kernel::build(config, ctx.pool.clone()).await.expect("kernel build should not touch the network");

    let first_body = r#"{"operations":[{"type":"create_node","board_id":"b1","n1":{}}]}"#;
    let app = build_app(kernel.clone());
    let first = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/batch")
                .header("content-type", "application/json")
                .header("x-user-id", "u1")
                .header("idempotency-key", "abc")
                .body(Body::from(first_body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first_status = first.status();
    let first_bytes = axum::body::to_bytes(first.into_body(), usize::MAX).await.unwrap();

    let queued_after_first = kernel.queue.queue_length().await.unwrap();
    assert_eq!(queued_after_first, 1);

    let altered_body = r#"{"operations":[{"type":"create_node","board_id":"b1","n1":{}},{"type":"create_node","board_id":"b1","n2":{}}]}"#;
    let app = build_app(kernel.clone());
    let second = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/batch")
                .header("content-type", "application/json")
                .header("x-user-id", "u1")
                .header("idempotency-key", "abc")
                .body(Body::from(altered_body))
                .unwrap(),
        )
        .await
        .unwrap();
    let second_status = second.status();
    let second_bytes = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();

    assert_eq!(second_status, first_status);
    assert_eq!(second_bytes, first_bytes);

    let queued_after_second = kernel.queue.queue_length().await.unwrap();
    assert_eq!(queued_after_second, 1, "replay must not enqueue additional tasks");
}
