// =============================================================================
// API-key authentication — Axum extractor
// =============================================================================
//
// Validates the `x-api-key` header against the `MERIDIAN_API_KEY` environment
// variable in constant time. When the variable is unset the check is
// disabled (development mode) with a startup warning from main.
//
// Usage as an Axum extractor:
//
//   async fn handler(_auth: ApiKey, ...) { ... }
//
// A missing or invalid key short-circuits the request with 403 before the
// handler body executes. Role gating and rate limiting live outside the
// engine core.
// =============================================================================

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

/// Header carrying the key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Compare two byte slices in constant time. Every byte of both slices is
/// examined even after a mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Axum extractor validating the `x-api-key` header.
pub struct ApiKey(pub String);

/// Rejection returned when the key check fails.
pub struct ApiKeyRejection;

impl IntoResponse for ApiKeyRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": "invalid API key" });
        (StatusCode::FORBIDDEN, axum::Json(body)).into_response()
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for ApiKey
where
    S: Send + Sync,
{
    type Rejection = ApiKeyRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Read on every request so key rotation does not require a restart.
        let expected = std::env::var("MERIDIAN_API_KEY").unwrap_or_default();
        if expected.is_empty() {
            // Auth disabled (development mode).
            return Ok(ApiKey(String::new()));
        }

        let provided = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
            Ok(ApiKey(provided.to_string()))
        } else {
            warn!("request rejected: invalid or missing API key");
            Err(ApiKeyRejection)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_slices() {
        assert!(constant_time_eq(b"secret-key", b"secret-key"));
    }

    #[test]
    fn constant_time_eq_rejects_mismatch() {
        assert!(!constant_time_eq(b"secret-key", b"secret-kez"));
        assert!(!constant_time_eq(b"short", b"longer-key"));
        assert!(!constant_time_eq(b"", b"x"));
    }

    #[test]
    fn constant_time_eq_empty_slices_match() {
        assert!(constant_time_eq(b"", b""));
    }
}
