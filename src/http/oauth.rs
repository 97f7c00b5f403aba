use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Redirect;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::security::{sign_state, verify_state};
use crate::Kernel;

#[derive(Deserialize)]
pub struct LoginQuery {
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// Redirects to the upstream authorize URL with an HMAC-signed `state`,
/// the thing `/oauth/callback` needs in order to verify anything at all.
pub async fn login(State(kernel): State<Arc<Kernel>>, Query(query): Query<LoginQuery>) -> AppResult<Redirect> {
    let nonce = Uuid::new_v4().to_string();
    let state = sign_state(kernel.config.client_secret.expose().as_bytes(), &nonce, &query.user_id);

    let url = format!(
        "{}?client_id={}&redirect_uri={}&scope={}&response_type=code&state={}",
        kernel.config.oauth_auth_base,
        urlencoding::encode(&kernel.config.client_id),
        urlencoding::encode(&kernel.config.oauth_redirect_uri),
        urlencoding::encode(&kernel.config.oauth_scope),
        urlencoding::encode(&state),
    );

    Ok(Redirect::temporary(&url))
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

pub async fn callback(
    State(kernel): State<Arc<Kernel>>,
    Query(query): Query<CallbackQuery>,
) -> AppResult<Redirect> {
    let (_nonce, user_id) = verify_state(kernel.config.client_secret.expose().as_bytes(), &query.state)
        .map_err(|e| AppError::BadRequest(format!("invalid state: {e}")))?;

    let tokens = kernel
        .upstream
        .exchange_code(&query.code, &kernel.config.oauth_redirect_uri)
        .await
        .map_err(|e| AppError::BadRequest(format!("code exchange failed: {e}")))?;

    kernel
        .tokens
        .store_initial_tokens(&user_id, None, &tokens.access_token, &tokens.refresh_token, tokens.expires_in)
        .await?;

    Ok(Redirect::temporary("/app.html"))
}
