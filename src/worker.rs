use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::cache::BoardCache;
use crate::governor::BucketRegistry;
use crate::jobs::JobStore;
use crate::models::{OperationStatus, Task};
use crate::queue::{TaskOutcome, TaskQueue};
use crate::tokens::TokenLifecycle;
use crate::upstream::UpstreamClient;

const MAX_ATTEMPTS: i32 = 5;
const RETRY_BASE: Duration = Duration::from_secs(2);
const RETRY_CAP: Duration = Duration::from_secs(60);
const ORPHAN_LEASE: Duration = Duration::from_secs(300);
const ORPHAN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// `delay = Retry-After if present, else min(CAP, base * 2^attempts) + jitter(0..1s)`.
fn retry_delay(attempts: i32, retry_after: Option<Duration>) -> Duration {
    if let Some(d) = retry_after {
        return d;
    }
    let exp = RETRY_BASE.saturating_mul(1u32.checked_shl(attempts as u32).unwrap_or(u32::MAX));
    let capped = exp.min(RETRY_CAP);
    let jitter_ms = rand::rng().random_range(0..1000);
    capped + Duration::from_millis(jitter_ms)
}

pub struct WorkerConfig {
    pub worker_count: usize,
    pub max_poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { worker_count: num_cpus::get(), max_poll_interval: Duration::from_secs(30) }
    }
}

/// Claims tasks, obtains a valid access token, paces through the user's
/// token bucket, invokes the upstream operation, and routes the outcome
/// through retry/DLQ, mirroring the claim/execute/ack loop of the teacher's
/// `JobWorker::run`, specialized to this pipeline's task kinds.
pub struct TaskWorker {
    queue: Arc<dyn TaskQueue>,
    tokens: Arc<TokenLifecycle>,
    buckets: Arc<BucketRegistry>,
    upstream: Arc<dyn UpstreamClient>,
    jobs: Arc<JobStore>,
    cache: Arc<BoardCache>,
    worker_id: String,
}

impl TaskWorker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        tokens: Arc<TokenLifecycle>,
        buckets: Arc<BucketRegistry>,
        upstream: Arc<dyn UpstreamClient>,
        jobs: Arc<JobStore>,
        cache: Arc<BoardCache>,
        worker_id: String,
    ) -> Self {
        Self { queue, tokens, buckets, upstream, jobs, cache, worker_id }
    }

    pub async fn run(self: Arc<Self>, config: WorkerConfig, shutdown: CancellationToken) {
        let wakeup = self.queue.wakeup_handle();
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            match self.queue.claim_next(&self.worker_id).await {
                Ok(Some(task)) => {
                    self.process(task).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = wakeup.notified() => {}
                        _ = tokio::time::sleep(config.max_poll_interval) => {}
                        _ = shutdown.cancelled() => return,
                    }
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.worker_id, error = %e, "failed to claim next task");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn process(&self, task: Task) {
        let span = tracing::info_span!(
            "task",
            task_id = task.id,
            kind = task.kind.as_str(),
            user_id = %task.user_id,
            attempt = task.attempts,
        );
        let _enter = span.enter();

        let access_token = match self.tokens.get_valid_access_token(&task.user_id).await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(error = %e, "could not obtain access token, retrying later");
                self.retry_or_fail(&task, format!("token error: {e}"), None).await;
                return;
            }
        };

        self.buckets.acquire(&task.user_id).await;

        match self.upstream.apply(&access_token, task.kind, &task.payload).await {
            Ok(_) => {
                if let Err(e) = self.queue.ack(&task, TaskOutcome::Completed).await {
                    tracing::error!(error = %e, "failed to ack completed task");
                    return;
                }
                if let Some(job_id) = task.job_id {
                    if let Err(e) = self.jobs.record_outcome(job_id, task.task_index, OperationStatus::Succeeded, None).await {
                        tracing::error!(error = %e, "failed to record job success");
                    }
                }
                if let Some(board_id) = task.payload.get("board_id").and_then(|v| v.as_str()) {
                    self.schedule_cache_refresh(board_id.to_string(), &access_token);
                }
                tracing::info!("task completed");
            }
            Err(upstream_err) => {
                let retryable = upstream_err.retryable();
                let retry_after = upstream_err.retry_after();
                tracing::warn!(error = %upstream_err, retryable, "upstream call failed");
                if retryable {
                    self.retry_or_fail(&task, upstream_err.to_string(), retry_after).await;
                } else {
                    self.fail(&task, upstream_err.to_string()).await;
                }
            }
        }
    }

    async fn retry_or_fail(&self, task: &Task, error: String, retry_after: Option<Duration>) {
        if task.attempts + 1 >= MAX_ATTEMPTS {
            self.fail(task, error).await;
            return;
        }
        let delay = retry_delay(task.attempts, retry_after);
        tokio::time::sleep(delay).await;
        if let Err(e) = self.queue.ack(task, TaskOutcome::Retry).await {
            tracing::error!(error = %e, "failed to ack retryable task");
        }
    }

    async fn fail(&self, task: &Task, error: String) {
        if let Err(e) = self.queue.ack(task, TaskOutcome::Failed { error: error.clone() }).await {
            tracing::error!(error = %e, "failed to move task to dead letter queue");
            return;
        }
        if let Some(job_id) = task.job_id {
            if let Err(e) = self
                .jobs
                .record_outcome(job_id, task.task_index, OperationStatus::Failed, Some(error))
                .await
            {
                tracing::error!(error = %e, "failed to record job failure");
            }
        }
    }

    fn schedule_cache_refresh(&self, board_id: String, access_token: &str) {
        let upstream = self.upstream.clone();
        let access_token = access_token.to_string();
        let board_id_for_fetch = board_id.clone();
        self.cache.clone().schedule_refresh(board_id, async move {
            upstream
                .fetch_board_snapshot(&access_token, &board_id_for_fetch)
                .await
                .map_err(|e| anyhow::anyhow!("fetch snapshot failed: {e}"))
        });
    }

    /// Periodically resets orphaned `processing` tasks back to `queued`
    /// when their worker disappeared without ack'ing.
    pub async fn run_orphan_sweeper(queue: Arc<dyn TaskQueue>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(ORPHAN_SWEEP_INTERVAL) => {}
                _ = shutdown.cancelled() => return,
            }
            match queue.recover_orphans(ORPHAN_LEASE).await {
                Ok(0) => {}
                Ok(n) => tracing::warn!(count = n, "recovered orphaned tasks"),
                Err(e) => tracing::error!(error = %e, "orphan recovery sweep failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_header_overrides_backoff_formula() {
        let d = retry_delay(3, Some(Duration::from_secs(7)));
        assert_eq!(d, Duration::from_secs(7));
    }

    #[test]
    fn backoff_grows_exponentially_until_capped() {
        let d0 = retry_delay(0, None);
        let d3 = retry_delay(3, None);
        assert!(d0 >= Duration::from_secs(2) && d0 < Duration::from_secs(3));
        assert!(d3 >= Duration::from_secs(16) && d3 < Duration::from_secs(17));
    }

    #[test]
    fn backoff_is_capped_at_sixty_seconds() {
        let d = retry_delay(10, None);
        assert!(d >= RETRY_CAP && d < RETRY_CAP + Duration::from_secs(1));
    }
}
