use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::security::verify_webhook_signature;
use crate::Kernel;

#[derive(Deserialize)]
struct WebhookPayload {
    #[allow(dead_code)]
    event: Option<String>,
    #[serde(flatten)]
    #[allow(dead_code)]
    rest: serde_json::Value,
}

/// Verifies `X-Miro-Signature` against the raw body before any JSON
/// parsing is attempted; a bad signature never reaches the parser.
pub async fn receive_webhook(
    State(kernel): State<Arc<Kernel>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    let signature = headers
        .get("x-miro-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing X-Miro-Signature header".into()))?;

    let secret = kernel.config.webhook_secret.expose();
    if !verify_webhook_signature(secret.as_bytes(), &body, signature) {
        return Err(AppError::Unauthorized("webhook signature mismatch".into()));
    }

    let _payload: WebhookPayload =
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(format!("invalid webhook payload: {e}")))?;

    Ok(StatusCode::ACCEPTED)
}
