//! Boundary behavior: `/api/logs` rejects a body over `log_max_payload_bytes`
//! with `413` before any entry is persisted, and rejects more than
//! `log_max_entries` entries with `413` as well.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use change_pipeline::{http::build_app, Kernel};
use common::TestHarness;
use test_context::test_context;
use tower::ServiceExt;

#[test_context(TestHarness)]
#[tokio::test]
async fn oversized_log_body_is_rejected_with_413(ctx: &TestHarness) {
    let mut config = ctx.config();
    config.log_max_payload_bytes = 64;
    let kernel = Kernel::build(config, ctx.pool.clone()).await.expect("kernel build should not touch the network");

    let message = "x".repeat(200);
    let body = format!(r#"[{{"timestamp":"2026-01-01T00:00:00Z","level":"info","message":"{message}"}}]"#);

    let app = build_app(kernel.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/logs")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let count: (i64,) =
        sqlx::query_as("SELECT count(*) FROM log_entries").fetch_one(&ctx.pool).await.unwrap();
    assert_eq!(count.0, 0, "rejected payload must not persist any entry");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn too_many_log_entries_is_rejected_with_413(ctx: &TestHarness) {
    let mut config = ctx.config();
    config.log_max_entries = 2;
    let kernel = Kernel::build(config, ctx.pool.clone()).await.expect("kernel build should not touch the network");

    let entry = r#"{"timestamp":"2026-01-01T00:00:00Z","level":"info","message":"m"}"#;
    let body = format!(r#"[{entry},{entry},{entry}]"#);

    let app = build_app(kernel.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/logs")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let count: (i64,) =
        sqlx::query_as("SELECT count(*) FROM log_entries").fetch_one(&ctx.pool).await.unwrap();
    assert_eq!(count.0, 0, "rejected payload must not persist any entry");
}
