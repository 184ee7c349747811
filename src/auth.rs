//! Bearer-token verification and the authenticated [`Actor`] extractor.
//!
//! Tokens are minted by the external auth service with the shared secret:
//! `<user-uuid>.<expiry-unix>.<hex hmac-sha256 of "<user-uuid>.<expiry-unix>">`.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::user::Role;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid signing key")]
    InvalidKey,
}

#[derive(Clone)]
pub struct TokenVerifier {
    key: HmacSha256,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Result<Self, TokenError> {
        let key = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::InvalidKey)?;
        Ok(Self { key })
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        let mut mac = self.key.clone();
        mac.update(payload.as_bytes());
        mac
    }

    /// Mints a token for `user_id` valid until `expires_at`.
    pub fn issue(&self, user_id: Uuid, expires_at: DateTime<Utc>) -> String {
        let payload = format!("{}.{}", user_id, expires_at.timestamp());
        let signature = hex::encode(self.mac(&payload).finalize().into_bytes());
        format!("{payload}.{signature}")
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Uuid, TokenError> {
        let (payload, signature) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
        let (user_id, expiry) = payload.split_once('.').ok_or(TokenError::Malformed)?;
        let user_id = Uuid::parse_str(user_id).map_err(|_| TokenError::Malformed)?;
        let expiry: i64 = expiry.parse().map_err(|_| TokenError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| TokenError::Malformed)?;

        self.mac(payload)
            .verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;
        if expiry <= now.timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(user_id)
    }
}

/// Authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let state = parts
            .extensions
            .get::<AppState>()
            .cloned()
            .ok_or_else(|| AppError::Internal("application state missing".into()))?;

        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))?;

        let user_id = state
            .tokens
            .verify(token, state.clock.now())
            .map_err(|err| {
                debug!(error = %err, "rejected bearer token");
                AppError::Unauthorized("Authentication required".into())
            })?;

        let user = state.store.find_user(user_id).await?.ok_or_else(|| {
            warn!(%user_id, "token for unknown user");
            AppError::Unauthorized("Authentication required".into())
        })?;

        Ok(Actor {
            id: user.id,
            role: user.role,
        })
    }
}
