use serde_json::{Value, json};

use crate::{
    clock::MonotonicClock,
    config::SeedConfig,
    error::StoreError,
    models::{Entry, EntryKind, EntryQuery},
    repository::EntryStore,
};

/// User the authenticated-user seed token maps to.
pub const SEED_TEST_USER: &str = "testUser";

const SYSTEM_OWNER: &str = "system";

/// Writes a control record unless the key already has one. Returns whether a
/// record was written.
async fn ensure_record(
    store: &dyn EntryStore,
    clock: &MonotonicClock,
    kind: EntryKind,
    key: &str,
    data: Value,
) -> Result<bool, StoreError> {
    if !store.query(kind, &EntryQuery::new(key, 1)).await?.is_empty() {
        return Ok(false);
    }
    let record = Entry {
        key: key.to_string(),
        created: clock.next_stamp(),
        readable: SYSTEM_OWNER.to_string(),
        owner: SYSTEM_OWNER.to_string(),
        data,
        id: None,
    };
    store.put(kind, record).await?;
    Ok(true)
}

/// seed_system_records
///
/// Writes the bootstrap control records configured in `SeedConfig`:
/// - authenticated-user token -> `testUser`
/// - admin token -> admin user
/// - admin user -> `admin` role
///
/// Existing records are left alone, so restarting against a persistent store
/// never duplicates a token mapping. Returns the number of records written.
pub async fn seed_system_records(
    store: &dyn EntryStore,
    seed: &SeedConfig,
    clock: &MonotonicClock,
) -> Result<usize, StoreError> {
    let mut written = 0;

    if let Some(token) = &seed.authenticated_user_token {
        let data = json!({ "user": SEED_TEST_USER });
        written += ensure_record(store, clock, EntryKind::SecretTokenMapping, token, data).await?
            as usize;
    }

    if let Some(admin) = &seed.admin_user {
        if let Some(token) = &seed.admin_user_token {
            let data = json!({ "user": admin });
            written += ensure_record(store, clock, EntryKind::SecretTokenMapping, token, data)
                .await? as usize;
        }
        let data = json!({ "role": "admin" });
        written +=
            ensure_record(store, clock, EntryKind::RoleAssignment, admin, data).await? as usize;
    }

    tracing::info!(records = written, "seeded system records");
    Ok(written)
}
