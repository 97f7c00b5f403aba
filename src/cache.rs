use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sqlx::PgPool;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const REFRESH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Per-board cache of the upstream board snapshot, refreshed on a debounced
/// timer: a successful task application resets the board's pending timer
/// rather than triggering an immediate refresh, coalescing bursts of writes
/// into a single upstream fetch per quiet period.
pub struct BoardCache {
    pool: PgPool,
    pending: DashMap<String, Arc<Notify>>,
    shutdown: CancellationToken,
}

impl BoardCache {
    pub fn new(pool: PgPool, shutdown: CancellationToken) -> Self {
        Self { pool, pending: DashMap::new(), shutdown }
    }

    /// (Re)schedules a refresh for `board_id`, cancelling any prior pending
    /// timer for the same board.
    pub fn schedule_refresh<F>(self: &Arc<Self>, board_id: String, fetch: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        let cancel = Arc::new(Notify::new());
        if let Some(prior) = self.pending.insert(board_id.clone(), cancel.clone()) {
            prior.notify_one();
        }

        let this = self.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(REFRESH_DEBOUNCE) => {}
                _ = cancel.notified() => return,
                _ = shutdown.cancelled() => return,
            }

            this.pending.remove(&board_id);

            match fetch.await {
                Ok(snapshot) => {
                    if let Err(e) = this.upsert(&board_id, &snapshot).await {
                        tracing::warn!(board_id, error = %e, "failed to persist board cache refresh");
                    }
                }
                Err(e) => {
                    tracing::warn!(board_id, error = %e, "failed to fetch board snapshot for cache refresh");
                }
            }
        })
    }

    async fn upsert(&self, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, created_at, updated_at)
            VALUES ($1, $2, now(), now())
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT value FROM cache_entries WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn purge_expired(&self, ttl: Duration) -> anyhow::Result<u64> {
        let threshold = chrono::Utc::now() - chrono::Duration::from_std(ttl)?;
        let result = sqlx::query("DELETE FROM cache_entries WHERE updated_at < $1")
            .bind(threshold)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
