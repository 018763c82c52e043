//! Request extractors for bearer-token users and the admin key.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::app::AppState;
use crate::domain::{AppError, User};

/// Header carrying the admin API key
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// The authenticated, non-suspended caller
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing Authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AppError::Authentication("Expected a Bearer token".to_string())
            })?;

        let user = state.service.authenticate(token).await?;
        Ok(AuthUser(user))
    }
}

/// Admits requests whose `X-Admin-Key` matches `ADMIN_API_KEY`
#[derive(Debug, Clone, Copy)]
pub struct AdminGuard;

impl FromRequestParts<Arc<AppState>> for AdminGuard {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let expected = state
            .admin_api_key
            .as_ref()
            .ok_or_else(|| AppError::Authorization("Admin API is disabled".to_string()))?;

        let provided = parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing X-Admin-Key header".to_string()))?;

        if !keys_match(provided, expected.expose_secret()) {
            warn!("Rejected admin request with an invalid key");
            return Err(AppError::Authorization("Invalid admin key".to_string()));
        }
        Ok(AdminGuard)
    }
}

/// Compare fixed-length digests so the check does not leak the key length
fn keys_match(provided: &str, expected: &str) -> bool {
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
