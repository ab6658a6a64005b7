use serde_json::Value;

use super::AuthError;
use crate::{
    models::{ANONYMOUS, EntryKind, EntryQuery, Identity, Role},
    repository::StoreState,
};

/// payload_field
///
/// Reads a string field from a control record payload. Payloads are either a
/// JSON object or a string holding one.
pub fn payload_field(data: &Value, field: &str) -> Option<String> {
    let parsed;
    let object = match data {
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(raw).ok()?;
            &parsed
        }
        other => other,
    };
    object.get(field)?.as_str().map(str::to_string)
}

/// RoleResolver
///
/// Maps a user to the role stored in its most recent `RoleAssignment` record.
#[derive(Clone)]
pub struct RoleResolver {
    store: StoreState,
}

impl RoleResolver {
    pub fn new(store: StoreState) -> Self {
        Self { store }
    }

    /// `None` for anonymous, for users without a record, and for records
    /// without a `role` field.
    pub async fn resolve(&self, user: &str) -> Result<Option<Role>, AuthError> {
        if user == ANONYMOUS {
            return Ok(None);
        }
        let records = self
            .store
            .query(EntryKind::RoleAssignment, &EntryQuery::new(user, 1))
            .await?;
        Ok(records
            .first()
            .and_then(|record| payload_field(&record.data, "role"))
            .map(Role::from))
    }

    /// identity_for
    ///
    /// The identity of an authenticated user. A missing role always means
    /// `authenticatedUser`.
    pub async fn identity_for(&self, user: &str) -> Result<Identity, AuthError> {
        let role = self
            .resolve(user)
            .await?
            .unwrap_or(Role::AuthenticatedUser);
        Ok(Identity::new(user, role))
    }
}

/// SecretTokenAuthenticator
///
/// Resolves an opaque `SecretToken` header through its `SecretTokenMapping`
/// record.
pub struct SecretTokenAuthenticator {
    store: StoreState,
    roles: RoleResolver,
}

impl SecretTokenAuthenticator {
    pub fn new(store: StoreState, roles: RoleResolver) -> Self {
        Self { store, roles }
    }

    /// verify
    ///
    /// Exactly one mapping record must exist for the token. Zero or several
    /// matches are `Unauthorized`.
    pub async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Unauthorized("empty secret token".to_string()));
        }

        // Two is enough to tell "exactly one" from "more than one".
        let records = self
            .store
            .query(EntryKind::SecretTokenMapping, &EntryQuery::new(token, 2))
            .await?;
        let [record] = records.as_slice() else {
            return Err(AuthError::Unauthorized(format!(
                "secret token matched {} records",
                records.len()
            )));
        };

        let user = payload_field(&record.data, "user")
            .filter(|user| !user.is_empty() && user != ANONYMOUS)
            .ok_or_else(|| AuthError::Unauthorized("secret token maps to no user".to_string()))?;

        self.roles.identity_for(&user).await
    }
}
