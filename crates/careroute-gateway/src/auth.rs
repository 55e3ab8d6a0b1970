//! Bearer-token check for the `/v1` triage routes
//!
//! `/api/status` is never gated. When no token is configured every
//! `/v1` request is let through and `run` warns once at startup.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use tracing::warn;

/// Why a `/v1` request was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No `Authorization: Bearer` header, or an empty token
    MissingToken,
    /// A token was sent but does not match
    WrongToken,
}

/// Gate a `/v1` request on the configured gateway token.
pub fn authorize_v1(configured_token: &str, headers: &HeaderMap) -> Result<(), AuthFailure> {
    if configured_token.is_empty() {
        return Ok(());
    }
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or(AuthFailure::MissingToken)?;

    if tokens_match(configured_token.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        warn!("Rejected /v1 request with a wrong bearer token");
        Err(AuthFailure::WrongToken)
    }
}

/// Token from an `Authorization: Bearer <token>` value
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let token = header_value.trim().strip_prefix("Bearer ")?.trim();
    if token.is_empty() { None } else { Some(token) }
}

// Compares every byte so the timing does not leak the matching prefix
fn tokens_match(expected: &[u8], provided: &[u8]) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected
        .iter()
        .zip(provided)
        .fold(0u8, |diff, (x, y)| diff | (x ^ y))
        == 0
}
