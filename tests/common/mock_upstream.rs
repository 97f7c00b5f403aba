//! A scripted [`UpstreamClient`] for deterministic worker/token tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use change_pipeline::models::TaskKind;
use change_pipeline::upstream::{RefreshedTokens, UpstreamClient, UpstreamError};

pub struct MockUpstreamClient {
    apply_script: Mutex<Vec<Result<serde_json::Value, UpstreamError>>>,
    apply_calls: Mutex<Vec<Instant>>,
    refresh_calls: AtomicUsize,
    refresh_delay: Duration,
    snapshot_calls: AtomicUsize,
}

impl MockUpstreamClient {
    /// `apply_script` is consumed front-to-back, one entry per `apply` call;
    /// once exhausted, further calls return a bare `Ok({})`.
    pub fn new(apply_script: Vec<Result<serde_json::Value, UpstreamError>>) -> Self {
        Self {
            apply_script: Mutex::new(apply_script),
            apply_calls: Mutex::new(Vec::new()),
            refresh_calls: AtomicUsize::new(0),
            refresh_delay: Duration::from_millis(0),
            snapshot_calls: AtomicUsize::new(0),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn apply_call_timestamps(&self) -> Vec<Instant> {
        self.apply_calls.lock().unwrap().clone()
    }

    pub fn refresh_call_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot_call_count(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamClient for MockUpstreamClient {
    async fn apply(
        &self,
        _access_token: &str,
        _kind: TaskKind,
        _payload: &serde_json::Value,
    ) -> Result<serde_json::Value, UpstreamError> {
        self.apply_calls.lock().unwrap().push(Instant::now());
        let mut script = self.apply_script.lock().unwrap();
        if script.is_empty() {
            Ok(serde_json::json!({}))
        } else {
            script.remove(0)
        }
    }

    async fn fetch_board_snapshot(
        &self,
        _access_token: &str,
        board_id: &str,
    ) -> Result<serde_json::Value, UpstreamError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "board_id": board_id, "items": [] }))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshedTokens, UpstreamError> {
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RefreshedTokens {
            access_token: format!("refreshed-{refresh_token}"),
            refresh_token: refresh_token.to_string(),
            expires_in: Duration::from_secs(3600),
        })
    }

    async fn exchange_code(&self, code: &str, _redirect_uri: &str) -> Result<RefreshedTokens, UpstreamError> {
        Ok(RefreshedTokens {
            access_token: format!("access-for-{code}"),
            refresh_token: format!("refresh-for-{code}"),
            expires_in: Duration::from_secs(3600),
        })
    }
}
