use std::sync::Arc;
use std::time::Duration;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::upstream::UpstreamClient;

const REFRESH_MARGIN: chrono::Duration = chrono::Duration::seconds(30);
const PLAINTEXT_PREFIX: &[u8] = b"plaintext:";

/// Seals and opens token bytes at rest. An ordered key list supports
/// rotation: the first key encrypts, every key is tried on decrypt. With no
/// keys configured, values are stored tagged-plaintext (development only).
pub struct Sealer {
    keys: Vec<Aes256Gcm>,
}

impl Sealer {
    pub fn new(hex_keys: &[String]) -> anyhow::Result<Self> {
        let keys = hex_keys
            .iter()
            .map(|k| {
                let bytes = hex::decode(k)?;
                anyhow::ensure!(bytes.len() == 32, "encryption key must be 32 bytes hex-encoded");
                Ok(Aes256Gcm::new_from_slice(&bytes)?)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { keys })
    }

    pub fn seal(&self, plaintext: &str) -> Vec<u8> {
        let Some(key) = self.keys.first() else {
            let mut out = PLAINTEXT_PREFIX.to_vec();
            out.extend_from_slice(plaintext.as_bytes());
            return out;
        };

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = key.encrypt(&nonce, plaintext.as_bytes()).expect("encryption cannot fail");

        let mut out = Vec::with_capacity(12 + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        out
    }

    pub fn open(&self, sealed: &[u8]) -> AppResult<String> {
        if let Some(rest) = sealed.strip_prefix(PLAINTEXT_PREFIX) {
            return Ok(String::from_utf8_lossy(rest).to_string());
        }

        if sealed.len() < 12 {
            return Err(AppError::InvalidToken);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        for key in &self.keys {
            if let Ok(plaintext) = key.decrypt(nonce, ciphertext) {
                return String::from_utf8(plaintext).map_err(|_| AppError::InvalidToken);
            }
        }
        Err(AppError::InvalidToken)
    }
}

/// Manages OAuth access/refresh tokens for upstream users: transparent
/// refresh-on-read with a per-user singleflight lock so concurrent workers
/// issue at most one refresh RPC per user.
pub struct TokenLifecycle {
    pool: PgPool,
    sealer: Sealer,
    client: Arc<dyn UpstreamClient>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TokenLifecycle {
    pub fn new(pool: PgPool, sealer: Sealer, client: Arc<dyn UpstreamClient>) -> Self {
        Self { pool, sealer, client, refresh_locks: DashMap::new() }
    }

    fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks.entry(user_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Returns a valid access token for `user_id`, refreshing first if it
    /// expires within [`REFRESH_MARGIN`]. Double-checks expiry after
    /// acquiring the per-user lock so a second waiter observes the refresh
    /// a prior waiter already performed and skips its own RPC.
    pub async fn get_valid_access_token(&self, user_id: &str) -> AppResult<String> {
        let row = self.load_user(user_id).await?;

        if row.expires_at - Utc::now() > REFRESH_MARGIN {
            return self.sealer.open(&row.access_token);
        }

        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        let row = self.load_user(user_id).await?;
        if row.expires_at - Utc::now() > REFRESH_MARGIN {
            return self.sealer.open(&row.access_token);
        }

        let refresh_token = self.sealer.open(&row.refresh_token)?;
        let refreshed = self
            .client
            .refresh_token(&refresh_token)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("token refresh failed: {e}")))?;

        let new_expires_at = Utc::now() + chrono::Duration::from_std(refreshed.expires_in).unwrap_or(chrono::Duration::hours(1));
        let sealed_access = self.sealer.seal(&refreshed.access_token);
        let sealed_refresh = self.sealer.seal(&refreshed.refresh_token);

        sqlx::query(
            r#"
            UPDATE users
            SET access_token = $2, refresh_token = $3, expires_at = $4, updated_at = now()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(&sealed_access)
        .bind(&sealed_refresh)
        .bind(new_expires_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(refreshed.access_token)
    }

    async fn load_user(&self, user_id: &str) -> AppResult<UserRow> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT access_token, refresh_token, expires_at FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::NotFound(format!("no credentials on file for user {user_id}")))?;
        Ok(row)
    }

    pub async fn store_initial_tokens(
        &self,
        user_id: &str,
        name: Option<&str>,
        access_token: &str,
        refresh_token: &str,
        expires_in: Duration,
    ) -> AppResult<()> {
        let expires_at = Utc::now() + chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::hours(1));
        sqlx::query(
            r#"
            INSERT INTO users (user_id, name, access_token, refresh_token, expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, now(), now())
            ON CONFLICT (user_id) DO UPDATE
            SET access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(self.sealer.seal(access_token))
        .bind(self.sealer.seal(refresh_token))
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;
        Ok(())
    }

    /// Drops per-user lock entries that nothing else is holding, so the
    /// registry doesn't grow without bound across the process lifetime.
    pub fn sweep_idle_locks(&self) {
        self.refresh_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    access_token: Vec<u8>,
    refresh_token: Vec<u8>,
    expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_roundtrips_with_a_key() {
        let key_hex = hex::encode([7u8; 32]);
        let sealer = Sealer::new(&[key_hex]).unwrap();
        let sealed = sealer.seal("top-secret-token");
        assert_eq!(sealer.open(&sealed).unwrap(), "top-secret-token");
    }

    #[test]
    fn second_key_can_decrypt_what_first_key_encrypted_after_rotation() {
        let old_key = hex::encode([1u8; 32]);
        let new_key = hex::encode([2u8; 32]);

        let old_sealer = Sealer::new(&[old_key.clone()]).unwrap();
        let sealed = old_sealer.seal("token-from-before-rotation");

        let rotated = Sealer::new(&[new_key, old_key]).unwrap();
        assert_eq!(rotated.open(&sealed).unwrap(), "token-from-before-rotation");
    }

    #[test]
    fn no_keys_configured_falls_back_to_tagged_plaintext() {
        let sealer = Sealer::new(&[]).unwrap();
        let sealed = sealer.seal("dev-mode-token");
        assert!(sealed.starts_with(PLAINTEXT_PREFIX));
        assert_eq!(sealer.open(&sealed).unwrap(), "dev-mode-token");
    }

    #[test]
    fn garbage_ciphertext_is_a_fatal_invalid_token_error() {
        let sealer = Sealer::new(&[hex::encode([9u8; 32])]).unwrap();
        let garbage = vec![0u8; 40];
        assert!(matches!(sealer.open(&garbage), Err(AppError::InvalidToken)));
    }
}
