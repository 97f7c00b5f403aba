//! Durable, rate-limited change pipeline between a whiteboard client and an
//! upstream collaborative-whiteboard API: a persistent task queue with
//! at-least-once delivery, per-user token-bucket pacing, capped-exponential
//! retry, a dead-letter sink, end-to-end idempotency, job aggregation, and a
//! debounced board-cache refresher.

pub mod cache;
pub mod config;
pub mod error;
pub mod governor;
pub mod http;
pub mod idempotency;
pub mod jobs;
pub mod models;
pub mod queue;
pub mod security;
pub mod tokens;
pub mod upstream;
pub mod worker;

use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::cache::BoardCache;
use crate::config::Config;
use crate::governor::BucketRegistry;
use crate::idempotency::IdempotencyCache;
use crate::jobs::JobStore;
use crate::queue::{PostgresTaskQueue, TaskQueue};
use crate::tokens::{Sealer, TokenLifecycle};
use crate::upstream::{HttpUpstreamClient, UpstreamClient};
use crate::worker::TaskWorker;

/// Process-owned container of every shared dependency, built once at
/// startup and torn down at shutdown. Mirrors the teacher's `ServerKernel`:
/// no global mutable singletons, everything is a field handed to the things
/// that need it.
pub struct Kernel {
    pub config: Config,
    pub pool: PgPool,
    pub queue: Arc<dyn TaskQueue>,
    pub jobs: Arc<JobStore>,
    pub idempotency: Arc<IdempotencyCache>,
    pub buckets: Arc<BucketRegistry>,
    pub tokens: Arc<TokenLifecycle>,
    pub cache: Arc<BoardCache>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub shutdown: CancellationToken,
}

impl Kernel {
    pub async fn build(config: Config, pool: PgPool) -> anyhow::Result<Arc<Self>> {
        let shutdown = CancellationToken::new();

        let upstream: Arc<dyn UpstreamClient> = Arc::new(HttpUpstreamClient::new(
            config.api_url.clone(),
            config.oauth_token_url.clone(),
            config.client_id.clone(),
            config.client_secret.expose().to_string(),
            std::time::Duration::from_secs(config.http_timeout_seconds),
        )?);

        let sealer = Sealer::new(&config.encryption_keys)?;
        let tokens = Arc::new(TokenLifecycle::new(pool.clone(), sealer, upstream.clone()));

        let queue: Arc<dyn TaskQueue> = Arc::new(PostgresTaskQueue::new(pool.clone()));
        let jobs = Arc::new(JobStore::new(pool.clone()));
        let idempotency = Arc::new(IdempotencyCache::new(
            pool.clone(),
            config.idempotency_cache_size,
            std::time::Duration::from_secs(config.idempotency_cache_ttl_seconds),
        ));
        let buckets = Arc::new(BucketRegistry::new(config.bucket_reservoir, config.bucket_refresh_ms));
        let cache = Arc::new(BoardCache::new(pool.clone(), shutdown.clone()));

        Ok(Arc::new(Self { config, pool, queue, jobs, idempotency, buckets, tokens, cache, upstream, shutdown }))
    }

    /// Spawns the worker pool and background sweepers; returns immediately.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        for i in 0..self.config.worker_count {
            let worker = Arc::new(TaskWorker::new(
                self.queue.clone(),
                self.tokens.clone(),
                self.buckets.clone(),
                self.upstream.clone(),
                self.jobs.clone(),
                self.cache.clone(),
                format!("worker-{i}"),
            ));
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                worker.run(worker::WorkerConfig::default(), shutdown).await;
            });
        }

        tokio::spawn(TaskWorker::run_orphan_sweeper(self.queue.clone(), self.shutdown.clone()));

        let idempotency = self.idempotency.clone();
        let shutdown = self.shutdown.clone();
        let cleanup_interval = std::time::Duration::from_secs(self.config.idempotency_cleanup_seconds);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(cleanup_interval) => {}
                    _ = shutdown.cancelled() => return,
                }
                if let Err(e) = idempotency.purge_expired().await {
                    tracing::warn!(error = %e, "idempotency purge failed");
                }
            }
        });

        let cache = self.cache.clone();
        let shutdown = self.shutdown.clone();
        let cache_ttl = std::time::Duration::from_secs(self.config.cache_ttl_seconds);
        let cache_cleanup_interval = std::time::Duration::from_secs(self.config.cache_cleanup_seconds);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(cache_cleanup_interval) => {}
                    _ = shutdown.cancelled() => return,
                }
                if let Err(e) = cache.purge_expired(cache_ttl).await {
                    tracing::warn!(error = %e, "board cache purge failed");
                }
            }
        });

        let tokens = self.tokens.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(300)) => {}
                    _ = shutdown.cancelled() => return,
                }
                tokens.sweep_idle_locks();
            }
        });
    }
}
