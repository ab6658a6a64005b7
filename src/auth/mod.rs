use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::{
    error::{ApiError, StoreError},
    models::Identity,
    repository::StoreState,
};

pub mod keys;
pub mod secret;
pub mod token;

pub use keys::{HttpKeySource, KeySource, PublicKey, PublicKeyCache};
pub use secret::{RoleResolver, SecretTokenAuthenticator};
pub use token::{Claims, TokenAuthenticator, TokenSettings};

/// Header carrying the opaque secret token (matched case-insensitively).
pub const SECRET_TOKEN_HEADER: &str = "secrettoken";

/// AuthError
///
/// Why an authentication attempt failed. Everything except `Store` downgrades
/// the caller to anonymous; `Store` is a collaborator failure and surfaces.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Signing key fetch failed: {0}")]
    KeyFetch(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        let reason = match err.kind() {
            ErrorKind::ExpiredSignature => "token expired".to_string(),
            ErrorKind::InvalidSignature => "invalid signature".to_string(),
            ErrorKind::InvalidAlgorithm => "algorithm not allowed for key".to_string(),
            ErrorKind::InvalidAudience => "audience mismatch".to_string(),
            ErrorKind::InvalidIssuer => "issuer mismatch".to_string(),
            _ => format!("token rejected: {err}"),
        };
        AuthError::Unauthorized(reason)
    }
}

/// AuthOutcome
///
/// The authorization decision for one request. When `is_authorized` is false
/// the identity is always anonymous/anonymous and `message` says why, if an
/// attempt was made at all.
#[derive(Debug, Clone, Serialize)]
pub struct AuthOutcome {
    pub is_authorized: bool,
    pub identity: Identity,
    pub message: Option<String>,
}

impl AuthOutcome {
    pub fn anonymous(message: Option<String>) -> Self {
        Self {
            is_authorized: false,
            identity: Identity::anonymous(),
            message,
        }
    }

    pub fn authorized(identity: Identity) -> Self {
        Self {
            is_authorized: true,
            identity,
            message: None,
        }
    }
}

/// Authorizer
///
/// Turns request headers into an `AuthOutcome`. Precedence:
/// 1. `SecretToken` header present: secret token only, even on failure.
/// 2. `Authorization: Bearer <token>`: signed token.
/// 3. Neither: anonymous, not an error.
///
/// Reads system records and may refresh the key cache; never writes.
pub struct Authorizer {
    secret: SecretTokenAuthenticator,
    token: TokenAuthenticator,
}

/// AuthorizerState
///
/// The shared handle stored in `AppState`.
pub type AuthorizerState = Arc<Authorizer>;

impl Authorizer {
    pub fn new(store: StoreState, keys: Arc<PublicKeyCache>, settings: TokenSettings) -> Self {
        let roles = RoleResolver::new(store.clone());
        Self {
            secret: SecretTokenAuthenticator::new(store, roles.clone()),
            token: TokenAuthenticator::new(keys, roles, settings),
        }
    }

    pub async fn authorize(&self, headers: &HeaderMap) -> Result<AuthOutcome, StoreError> {
        // 1. Secret Token
        // Its presence alone selects this scheme; a failure here never falls
        // through to the bearer token.
        if let Some(value) = headers.get(SECRET_TOKEN_HEADER) {
            // Non-visible-ASCII header values can not match any record.
            let token = value.to_str().unwrap_or_default();
            return settle("secret_token", self.secret.verify(token).await);
        }

        // 2. Bearer Token
        if let Some(token) = bearer_token(headers) {
            return settle("bearer", self.token.verify(token).await);
        }

        // 3. No credentials: anonymous, and not an error.
        Ok(AuthOutcome::anonymous(None))
    }
}

fn settle(
    scheme: &'static str,
    result: Result<Identity, AuthError>,
) -> Result<AuthOutcome, StoreError> {
    match result {
        Ok(identity) => {
            tracing::debug!(scheme, user = %identity.user, role = %identity.role, "caller authenticated");
            Ok(AuthOutcome::authorized(identity))
        }
        Err(AuthError::Store(err)) => Err(err),
        Err(err) => {
            tracing::warn!(scheme, error = %err, "authentication failed, continuing as anonymous");
            Ok(AuthOutcome::anonymous(Some(err.to_string())))
        }
    }
}

/// Extracts `<token>` from `Authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// AuthOutcome Extractor Implementation
///
/// Implements Axum's FromRequestParts trait, making `AuthOutcome` usable as a
/// handler argument on every route. Handlers then decide for themselves what a
/// failed authentication means: reads and writes continue as anonymous,
/// deletes and `/auth` answer 401.
///
/// The process involves:
/// 1. Dependency Resolution: pulling the shared `Authorizer` out of the state.
/// 2. Authorization: secret token, else bearer token, else anonymous.
///
/// Rejection: only `500`, when a system-record lookup hits a store failure.
/// A failed authentication is never a rejection.
impl<S> FromRequestParts<S> for AuthOutcome
where
    // S must allow sending across threads and sharing.
    S: Send + Sync,
    // Allows the extractor to pull the Authorizer from the app state.
    AuthorizerState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // 1. Dependency Resolution
        let authorizer = AuthorizerState::from_ref(state);

        // 2. Authorization
        // Only headers are read, so the body stays available to the handler.
        // A `StoreError` converts into `ApiError::Internal`.
        Ok(authorizer.authorize(&parts.headers).await?)
    }
}
