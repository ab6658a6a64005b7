use jsonwebtoken::{Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{AuthError, keys::PublicKeyCache, secret::RoleResolver};
use crate::models::{ANONYMOUS, Identity};

/// Claims
///
/// The part of the bearer token payload this service reads. `exp` is always
/// validated; the identity is `email` when present, else `sub`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: u64,
}

impl Claims {
    /// The claimed user. Blank values and the reserved anonymous name are
    /// treated as no user at all.
    fn user(self) -> Option<String> {
        self.email
            .or(self.sub)
            .filter(|user| !user.trim().is_empty() && user != ANONYMOUS)
    }
}

/// Optional audience/issuer pinning.
#[derive(Debug, Clone, Default)]
pub struct TokenSettings {
    pub audience: Option<String>,
    pub issuer: Option<String>,
}

/// TokenAuthenticator
///
/// Verifies `Authorization: Bearer <jwt>` tokens against the cached signing
/// keys and resolves the caller's role.
pub struct TokenAuthenticator {
    keys: Arc<PublicKeyCache>,
    roles: RoleResolver,
    settings: TokenSettings,
}

impl TokenAuthenticator {
    pub fn new(keys: Arc<PublicKeyCache>, roles: RoleResolver, settings: TokenSettings) -> Self {
        Self {
            keys,
            roles,
            settings,
        }
    }

    /// verify
    ///
    /// 1. Reads the unverified header for its `kid`.
    /// 2. Looks the key up in the cache; an unknown kid is `InvalidToken`.
    /// 3. Verifies with the algorithms pinned to that key only. The header's
    ///    `alg` never widens the allow-list.
    /// 4. Resolves the role of the claimed user.
    pub async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let header = decode_header(token)
            .map_err(|e| AuthError::Unauthorized(format!("malformed token: {e}")))?;
        let kid = header.kid.ok_or(AuthError::InvalidToken)?;

        let key = self
            .keys
            .get_key(&kid)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let mut validation = Validation::new(key.algorithms[0]);
        validation.algorithms = key.algorithms.clone();
        validation.validate_exp = true;
        match &self.settings.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &self.settings.issuer {
            validation.set_issuer(&[issuer]);
        }

        let token_data = decode::<Claims>(token, &key.decoding_key, &validation)?;
        let user = token_data
            .claims
            .user()
            .ok_or_else(|| AuthError::Unauthorized("token carries no subject".to_string()))?;

        tracing::debug!(kid = %kid, user = %user, "bearer token verified");
        self.roles.identity_for(&user).await
    }
}
