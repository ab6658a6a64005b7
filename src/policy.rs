//! Per-entry tenancy rules: who may see an entry, who may delete it, and
//! which keys a caller may write to.

use crate::{
    error::ApiError,
    models::{Entry, Identity, READABLE_AUTHENTICATED, READABLE_PUBLIC},
};

/// Prefix of keys reserved for control records.
pub const RESERVED_PREFIX: &str = "system";

/// Prefix of keys only writable by the user named in their suffix.
pub const PRIVATE_KEY_PREFIX: &str = "privateKey";

/// VisibilityFilter
///
/// Read-visibility rules applied to every read/list result.
pub struct VisibilityFilter;

impl VisibilityFilter {
    /// can_read
    ///
    /// An entry is visible if any of these holds:
    /// - it is public (`*`)
    /// - it is `authenticated` and the caller is not anonymous
    /// - the caller owns it and is not anonymous
    /// - the caller is an admin
    pub fn can_read(entry: &Entry, caller: &Identity) -> bool {
        if entry.readable == READABLE_PUBLIC || caller.is_admin() {
            return true;
        }
        if caller.is_anonymous() {
            return false;
        }
        entry.readable == READABLE_AUTHENTICATED || entry.owner == caller.user
    }

    /// Keeps the visible entries, order preserved. Applied to the whole page.
    pub fn filter(entries: Vec<Entry>, caller: &Identity) -> Vec<Entry> {
        entries
            .into_iter()
            .filter(|entry| Self::can_read(entry, caller))
            .collect()
    }
}

/// OwnershipGuard
///
/// Write and delete authorization.
pub struct OwnershipGuard;

impl OwnershipGuard {
    /// True iff the caller is an admin, or a non-anonymous owner of the entry.
    pub fn can_delete(entry: &Entry, caller: &Identity) -> bool {
        caller.is_admin() || (!caller.is_anonymous() && entry.owner == caller.user)
    }

    /// authorized_subset
    ///
    /// Splits a multi-entry delete target into the entries the caller may
    /// delete. Nothing is deleted here; callers check the subset first and only
    /// then issue deletes.
    pub fn authorized_subset(entries: Vec<Entry>, caller: &Identity) -> Vec<Entry> {
        entries
            .into_iter()
            .filter(|entry| Self::can_delete(entry, caller))
            .collect()
    }

    /// check_create
    ///
    /// Any caller may create an entry, except that a `privateKey*` key must be
    /// exactly `privateKey-<caller.user>` and the caller must be authenticated.
    pub fn check_create(key: &str, caller: &Identity) -> Result<(), ApiError> {
        if !key.starts_with(PRIVATE_KEY_PREFIX) {
            return Ok(());
        }
        let expected = format!("{PRIVATE_KEY_PREFIX}-{}", caller.user);
        if caller.is_anonymous() || key != expected {
            return Err(ApiError::Forbidden(format!(
                "Key {key} is private to another user"
            )));
        }
        Ok(())
    }
}

/// Reserved keys are rejected from every public read, write and delete path.
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// validate_user_key
///
/// Shared `key` parameter check of every handler: present, non-empty, and
/// outside the reserved namespace.
pub fn validate_user_key(key: Option<&str>) -> Result<&str, ApiError> {
    let key = key
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Key parameter is required".to_string()))?;
    if is_reserved_key(key) {
        return Err(ApiError::BadRequest(format!("Key {key} is reserved")));
    }
    Ok(key)
}
