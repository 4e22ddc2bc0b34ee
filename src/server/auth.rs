//! API-key authentication for the `/api/v1` routes.
//!
//! Keys are accepted as `Authorization: Bearer <key>` or `X-API-Key: <key>`.
//! Only the SHA-256 digest of the configured key is kept in memory, and
//! presented keys are compared digest to digest.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use super::http::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct ApiKey {
    digest: [u8; 32],
}

impl ApiKey {
    pub fn new(key: &str) -> Self {
        Self {
            digest: Sha256::digest(key.as_bytes()).into(),
        }
    }

    pub fn matches(&self, presented: &str) -> bool {
        let presented: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        presented
            .iter()
            .zip(self.digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        return Some(bearer.trim());
    }
    headers
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
}

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let Some(ref expected) = state.api_key else {
        return next.run(request).await;
    };

    match presented_key(&headers) {
        Some(key) if expected.matches(key) => next.run(request).await,
        presented => {
            debug!(
                path = %request.uri().path(),
                "Rejected request: {}",
                if presented.is_some() { "wrong API key" } else { "no API key" }
            );
            (
                StatusCode::UNAUTHORIZED,
                axum::Json(json!({
                    "status": "error",
                    "category": "unauthorized",
                    "message": "missing or invalid API key",
                })),
            )
                .into_response()
        }
    }
}
