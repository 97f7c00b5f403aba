use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::models::TaskKind;

/// The only classification the worker is allowed to branch on. Raw HTTP
/// status never leaks past the client.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient upstream error (status {status:?})")]
    Transient { status: Option<u16> },

    #[error("permanent upstream error (status {status})")]
    Permanent { status: u16 },
}

impl UpstreamError {
    pub fn retryable(&self) -> bool {
        matches!(self, UpstreamError::RateLimited { .. } | UpstreamError::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            UpstreamError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Parses a `Retry-After` header per RFC 9110: either delta-seconds or an
/// HTTP-date. Returns `None` if the header is absent or unparseable.
pub fn parse_retry_after(header: Option<&str>, now: DateTime<Utc>) -> Option<Duration> {
    let raw = header?;
    if let Ok(seconds) = raw.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = DateTime::parse_from_rfc2822(raw.trim()).ok()?.with_timezone(&Utc);
    let delta = (date - now).num_seconds();
    Some(Duration::from_secs(delta.max(0) as u64))
}

fn classify(status: StatusCode, retry_after: Option<&str>, now: DateTime<Utc>) -> UpstreamError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        UpstreamError::RateLimited { retry_after: parse_retry_after(retry_after, now) }
    } else if status.is_server_error() {
        UpstreamError::Transient { status: Some(status.as_u16()) }
    } else {
        UpstreamError::Permanent { status: status.as_u16() }
    }
}

/// The set of upstream mutations the worker can invoke, one per `TaskKind`.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn apply(
        &self,
        access_token: &str,
        kind: TaskKind,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, UpstreamError>;

    async fn fetch_board_snapshot(
        &self,
        access_token: &str,
        board_id: &str,
    ) -> Result<serde_json::Value, UpstreamError>;

    async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedTokens, UpstreamError>;

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<RefreshedTokens, UpstreamError>;
}

pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: Duration,
}

/// `reqwest`-backed implementation of [`UpstreamClient`] against the real
/// whiteboard SaaS.
pub struct HttpUpstreamClient {
    http: Client,
    api_base: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpUpstreamClient {
    pub fn new(
        api_base: String,
        token_url: String,
        client_id: String,
        client_secret: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent("miro-change-pipeline/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;
        Ok(Self { http, api_base, token_url, client_id, client_secret })
    }

    fn board_path(&self, board_id: &str) -> String {
        format!("{}/v2/boards/{}", self.api_base, board_id)
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, UpstreamError> {
        let resp = req.send().await.map_err(|_| UpstreamError::Transient { status: None })?;
        let status = resp.status();
        if status.is_success() {
            resp.json::<serde_json::Value>()
                .await
                .map_err(|_| UpstreamError::Transient { status: Some(status.as_u16()) })
        } else {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            Err(classify(status, retry_after.as_deref(), Utc::now()))
        }
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn apply(
        &self,
        access_token: &str,
        kind: TaskKind,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, UpstreamError> {
        let board_id = payload
            .get("board_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let base = self.board_path(board_id);
        let req = match kind {
            TaskKind::CreateNode | TaskKind::CreateShape => {
                self.http.post(format!("{base}/items")).bearer_auth(access_token).json(payload)
            }
            TaskKind::UpdateCard | TaskKind::UpdateShape => {
                let item_id = payload.get("shape_id").or_else(|| payload.get("card_id"))
                    .and_then(|v| v.as_str()).unwrap_or_default();
                self.http.patch(format!("{base}/items/{item_id}")).bearer_auth(access_token).json(payload)
            }
            TaskKind::DeleteShape => {
                let item_id = payload.get("shape_id").and_then(|v| v.as_str()).unwrap_or_default();
                self.http.delete(format!("{base}/items/{item_id}")).bearer_auth(access_token)
            }
        };
        self.send(req).await
    }

    async fn fetch_board_snapshot(
        &self,
        access_token: &str,
        board_id: &str,
    ) -> Result<serde_json::Value, UpstreamError> {
        let req = self.http.get(self.board_path(board_id)).bearer_auth(access_token);
        self.send(req).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshedTokens, UpstreamError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ], refresh_token)
        .await
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<RefreshedTokens, UpstreamError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ], "")
        .await
    }
}

impl HttpUpstreamClient {
    async fn token_request(
        &self,
        form: &[(&str, &str)],
        fallback_refresh_token: &str,
    ) -> Result<RefreshedTokens, UpstreamError> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|_| UpstreamError::Transient { status: None })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify(status, None, Utc::now()));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|_| UpstreamError::Transient { status: Some(status.as_u16()) })?;

        let access_token = body.get("access_token").and_then(|v| v.as_str())
            .ok_or(UpstreamError::Permanent { status: status.as_u16() })?.to_string();
        let refresh_token = body.get("refresh_token").and_then(|v| v.as_str())
            .unwrap_or(fallback_refresh_token).to_string();
        let expires_in = body.get("expires_in").and_then(|v| v.as_u64()).unwrap_or(3600);

        Ok(RefreshedTokens {
            access_token,
            refresh_token,
            expires_in: Duration::from_secs(expires_in),
        })
    }
}
