//! Bearer-JWT authentication.
//!
//! HTTP requests carry `Authorization: Bearer <token>`; WebSocket upgrades
//! pass the token as a `token` query parameter. Tokens carry the user id in
//! the `sub` claim.

use crate::error::ApiError;
use crate::state::AppState;
use agentflow_core::UserId;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// JWT claims carried by access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The user id.
    pub sub: String,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

/// Verifier built once from the JWT config.
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    encoding_key: jsonwebtoken::EncodingKey,
    header: jsonwebtoken::Header,
}

impl JwtVerifier {
    /// Builds a verifier from the shared secret and algorithm name.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown algorithm name.
    pub fn new(secret: &str, algorithm: &str) -> Result<Self, ApiError> {
        let algorithm = Algorithm::from_str(algorithm)
            .map_err(|_| ApiError::Internal(format!("unknown jwt algorithm: {algorithm}")))?;
        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(algorithm),
            encoding_key: jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
            header: jsonwebtoken::Header::new(algorithm),
        })
    }

    /// Decodes a token and returns the user id from its `sub` claim.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for expired, malformed, or mis-signed tokens.
    pub fn verify(&self, token: &str) -> Result<UserId, ApiError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| ApiError::Unauthorized(format!("invalid token: {e}")))?;
        data.claims
            .sub
            .parse()
            .map_err(|_| ApiError::Unauthorized("invalid user id claim".to_string()))
    }

    /// Issues a token for a user; used by tests and tooling.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn issue(&self, user_id: UserId, lifetime_minutes: i64) -> Result<String, ApiError> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (chrono::Utc::now() + chrono::Duration::minutes(lifetime_minutes)).timestamp(),
        };
        encode(&self.header, &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("failed to sign token: {e}")))
    }
}

/// The authenticated caller, extracted from the bearer header.
pub struct AuthUser(pub UserId);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("expected Bearer token".to_string()))?;

        state.jwt.verify(token).map(AuthUser)
    }
}
