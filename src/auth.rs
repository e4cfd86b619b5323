//! Auth verifier: bearer token → user identity.
//!
//! Tokens are HS256 JWTs carrying `user_id`. Resolution never raises: it
//! returns the identity or an [`AuthError`] the caller branches on.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::{Role, Store, UserRow};
use crate::error::{AuthError, CivicError};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i32,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// The resolved, persisted user behind a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: i32,
    pub username: String,
    pub role: Role,
    pub constituency: String,
    pub is_active: bool,
}

impl From<UserRow> for UserIdentity {
    fn from(row: UserRow) -> Self {
        Self {
            role: row.role(),
            id: row.id,
            username: row.username,
            constituency: row.constituency,
            is_active: row.is_active,
        }
    }
}

pub struct AuthVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_minutes: i64,
    store: Arc<dyn Store>,
}

impl AuthVerifier {
    pub fn new(secret: &str, ttl_minutes: i64, store: Arc<dyn Store>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_minutes,
            store,
        }
    }

    /// Mint an access token. Issuance normally belongs to the login service;
    /// this exists for tooling and tests.
    pub fn issue_token(&self, user_id: i32) -> Result<String, AuthError> {
        self.issue_token_with_exp(user_id, Utc::now().timestamp() + self.ttl_minutes * 60)
    }

    pub fn issue_token_with_exp(&self, user_id: i32, exp: i64) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::default(), &Claims { user_id, exp }, &self.encoding)
            .map_err(|_| AuthError::InvalidToken)
    }

    /// Check signature and expiry only.
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken,
            })
    }

    /// Verify the token and load its user. Suspension is not checked here;
    /// callers decide what a suspended identity may do.
    pub async fn resolve_identity(&self, token: &str) -> Result<UserIdentity, AuthError> {
        let claims = self.verify_token(token)?;
        match self.store.get_user(claims.user_id).await {
            Ok(Some(row)) => Ok(row.into()),
            Ok(None) => Err(AuthError::UnknownUser),
            Err(e) => {
                warn!(user_id = claims.user_id, "identity lookup failed: {e}");
                Err(AuthError::Lookup)
            }
        }
    }
}

/// Authenticated, active caller of a REST producer.
/// Reads `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserIdentity);

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = CivicError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AuthError::MissingToken)?;

        let identity = state.auth.resolve_identity(token).await?;
        if !identity.is_active {
            return Err(AuthError::Suspended.into());
        }
        Ok(CurrentUser(identity))
    }
}
