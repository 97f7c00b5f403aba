use std::time::{Duration, Instant};

use lru::LruCache;
use sqlx::PgPool;
use std::num::NonZeroUsize;
use tokio::sync::Mutex;

/// A memoized `{status, body}` pair returned verbatim on replay.
#[derive(Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

struct Entry {
    response: CachedResponse,
    inserted_at: Instant,
}

/// Two-tier idempotency cache: a bounded in-memory LRU+TTL tier fronts the
/// persistent `idempotency` Postgres table (48h TTL, purged separately).
/// Only client-supplied keys are ever consulted; absent key means no dedup.
pub struct IdempotencyCache {
    memory: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
    pool: PgPool,
}

/// Sentinel `response_status` for a row that has been reserved by a winning
/// `reserve()` call but not yet finalized — distinguishes "no one has claimed
/// this key" (no row) from "someone is already doing the work" (row present,
/// still pending).
const PENDING_STATUS: i16 = 0;

impl IdempotencyCache {
    pub fn new(pool: PgPool, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { memory: Mutex::new(LruCache::new(capacity)), ttl, pool }
    }

    /// Looks up `key`, promoting a persistent-tier hit into memory. Returns
    /// `None` both when the key is unknown and when it is reserved but not
    /// yet finalized (callers distinguish the two via `reserve`).
    pub async fn get(&self, key: &str) -> anyhow::Result<Option<CachedResponse>> {
        {
            let mut memory = self.memory.lock().await;
            if let Some(entry) = memory.get(key) {
                if entry.inserted_at.elapsed() < self.ttl {
                    return Ok(Some(entry.response.clone()));
                }
                memory.pop(key);
            }
        }

        let row: Option<(i16, serde_json::Value)> = sqlx::query_as(
            "SELECT response_status, response_body FROM idempotency WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((status, _)) if status == PENDING_STATUS => None,
            Some((status, body)) => {
                let response = CachedResponse { status: status as u16, body };
                let mut memory = self.memory.lock().await;
                memory.put(key.to_string(), Entry { response: response.clone(), inserted_at: Instant::now() });
                Some(response)
            }
            None => None,
        })
    }

    /// Atomically claims `key` for the caller. Returns `true` if this call's
    /// insert won the race (the caller must do the work and call `finalize`
    /// or `release`); `false` if another caller already holds or has
    /// finalized the key (the caller should wait via `wait_for_result`).
    ///
    /// This is the single atomic decision point: concurrent callers racing
    /// on the same key all attempt this insert, and `ON CONFLICT DO NOTHING`
    /// guarantees only one of them proceeds to enqueue work.
    pub async fn reserve(&self, key: &str) -> anyhow::Result<bool> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO idempotency (key, response_status, response_body, created_at)
            VALUES ($1, $2, 'null'::jsonb, now())
            ON CONFLICT (key) DO NOTHING
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(PENDING_STATUS)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Polls for a key's final response, for callers that lost `reserve`.
    /// Returns `None` if `timeout` elapses before the winner finalizes.
    pub async fn wait_for_result(&self, key: &str, timeout: Duration) -> anyhow::Result<Option<CachedResponse>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(cached) = self.get(key).await? {
                return Ok(Some(cached));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Finalizes a reservation this caller won, storing the real response
    /// and promoting it into the memory tier. Only 2xx responses are stored;
    /// non-2xx instead goes through `release` so the key becomes retryable.
    pub async fn finalize(&self, key: &str, status: u16, body: &serde_json::Value) -> anyhow::Result<()> {
        if !(200..300).contains(&status) {
            return self.release(key).await;
        }

        sqlx::query("UPDATE idempotency SET response_status = $2, response_body = $3 WHERE key = $1")
            .bind(key)
            .bind(status as i16)
            .bind(body)
            .execute(&self.pool)
            .await?;

        let mut memory = self.memory.lock().await;
        memory.put(
            key.to_string(),
            Entry { response: CachedResponse { status, body: body.clone() }, inserted_at: Instant::now() },
        );
        Ok(())
    }

    /// Releases a reservation this caller won but failed to complete, so a
    /// later request with the same key is free to retry. A no-op if the row
    /// was already finalized (guards against a race with a concurrent
    /// `finalize`, though only the reserving caller ever calls this).
    pub async fn release(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM idempotency WHERE key = $1 AND response_status = $2")
            .bind(key)
            .bind(PENDING_STATUS)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes persistent entries older than the 48h retention window.
    pub async fn purge_expired(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "DELETE FROM idempotency WHERE created_at < now() - interval '48 hours' AND response_status != $1",
        )
        .bind(PENDING_STATUS)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
