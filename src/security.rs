use std::fmt;

use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretBox};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A secret string that won't be logged or displayed. Wraps
/// `secrecy::SecretBox` so API keys and signing secrets never land in a
/// `{:?}` or `{}` format accidentally.
pub struct SecretString(SecretBox<str>);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(Box::from(value.into().as_str())))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_string())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Signs an OAuth `state` value as `base64url(nonce:user_id:hex_hmac)`
/// (padding stripped), so a callback can verify it was minted by us and
/// bound to this `user_id`. Grounded on the governing `sign_state`/
/// `verify_state` pair rather than the unsigned nonce-only variant.
pub fn sign_state(secret: &[u8], nonce: &str, user_id: &str) -> String {
    let message = format!("{nonce}:{user_id}");
    let signature = hmac_hex(secret, message.as_bytes());
    let payload = format!("{message}:{signature}");
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(payload)
}

/// Verifies a `state` value produced by [`sign_state`]. Returns the
/// `(nonce, user_id)` pair on success. Any malformed input, unknown nonce
/// shape, or signature mismatch is rejected — there is no fallback to an
/// unverified `user_id`.
pub fn verify_state(secret: &[u8], state: &str) -> Result<(String, String), StateError> {
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(state)
        .map_err(|_| StateError::Malformed)?;
    let decoded = String::from_utf8(decoded).map_err(|_| StateError::Malformed)?;

    let mut parts = decoded.splitn(3, ':');
    let nonce = parts.next().ok_or(StateError::Malformed)?;
    let user_id = parts.next().ok_or(StateError::Malformed)?;
    let signature = parts.next().ok_or(StateError::Malformed)?;

    let message = format!("{nonce}:{user_id}");
    let expected = hmac_hex(secret, message.as_bytes());

    if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
        return Err(StateError::SignatureMismatch);
    }

    Ok((nonce.to_string(), user_id.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("malformed state parameter")]
    Malformed,
    #[error("state signature mismatch")]
    SignatureMismatch,
}

/// Verifies the `X-Miro-Signature` header against the raw request body
/// before any JSON parsing happens.
pub fn verify_webhook_signature(secret: &[u8], body: &[u8], signature_header: &str) -> bool {
    let expected = hmac_hex(secret, body);
    constant_time_eq(expected.as_bytes(), signature_header.as_bytes())
}

fn hmac_hex(secret: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_string_is_redacted_in_debug_and_display() {
        let secret = SecretString::new("sk-super-secret-key");
        assert!(!format!("{secret:?}").contains("sk-super"));
        assert!(!format!("{secret}").contains("sk-super"));
        assert_eq!(secret.expose(), "sk-super-secret-key");
    }

    #[test]
    fn sign_then_verify_roundtrips() {
        let secret = b"test-secret";
        let state = sign_state(secret, "nonce-1", "user-42");
        let (nonce, user_id) = verify_state(secret, &state).unwrap();
        assert_eq!(nonce, "nonce-1");
        assert_eq!(user_id, "user-42");
    }

    #[test]
    fn tampered_user_id_fails_verification() {
        let secret = b"test-secret";
        let state = sign_state(secret, "nonce-1", "user-42");
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(&state).unwrap();
        let mut decoded = String::from_utf8(decoded).unwrap();
        decoded = decoded.replace("user-42", "user-43");
        let tampered = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(decoded);
        assert!(matches!(verify_state(secret, &tampered), Err(StateError::SignatureMismatch)));
    }

    #[test]
    fn malformed_state_is_rejected() {
        assert!(matches!(verify_state(b"secret", "not-valid-base64!!"), Err(StateError::Malformed)));
    }

    #[test]
    fn webhook_signature_matches_known_vector() {
        let secret = b"whsec";
        let body = b"{\"event\":\"board.updated\"}";
        let sig = super::hmac_hex(secret, body);
        assert!(verify_webhook_signature(secret, body, &sig));
        assert!(!verify_webhook_signature(secret, body, "0000"));
    }
}
