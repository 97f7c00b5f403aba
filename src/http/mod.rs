mod batch;
mod cache;
mod health;
mod jobs;
mod limits;
mod logs;
mod oauth;
mod webhook;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::Kernel;

/// Builds the axum router: thin glue in front of the change pipeline,
/// layered the way the teacher's `server/app.rs` layers its own router
/// (trace layer, CORS, timeout; IP-based throttling only in non-debug
/// builds, same as the teacher's `tower_governor` usage).
pub fn build_app(kernel: Arc<Kernel>) -> Router {
    let cors = if kernel.config.cors_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<_> = kernel
            .config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
    };

    let router = Router::new()
        .route("/health", get(health::health))
        .route("/api/batch", post(batch::submit_batch))
        .route("/api/jobs/:id", get(jobs::get_job))
        .route("/api/cache/:board_id", get(cache::get_cache))
        .route("/api/limits", get(limits::get_limits))
        .route("/api/logs", post(logs::submit_logs))
        .route("/oauth/login", get(oauth::login))
        .route("/oauth/callback", get(oauth::callback))
        .route("/api/webhook", post(webhook::receive_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(TimeoutLayer::new(Duration::from_secs(kernel.config.http_timeout_seconds)))
        .with_state(kernel);

    #[cfg(not(debug_assertions))]
    let router = {
        use std::sync::Arc as StdArc;
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let governor_conf = StdArc::new(
            GovernorConfigBuilder::default()
                .per_second(10)
                .burst_size(20)
                .finish()
                .expect("valid governor config"),
        );
        router.layer(GovernorLayer { config: governor_conf })
    };

    router
}
