use crate::{
    AppState,
    auth::AuthOutcome,
    error::{ApiError, StoreError},
    models::{
        CreateEntryRequest, CreatedResponse, DeleteEntryRequest, DeletedResponse, Entry,
        EntryKind, EntryQuery, Identity, ListEntriesParams, MessageResponse, READABLE_PUBLIC,
    },
    policy::{OwnershipGuard, VisibilityFilter, validate_user_key},
};
use axum::{
    Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};

/// How many fresh `created` stamps a create tries before giving up. A clash
/// only happens when another instance stamped the same millisecond.
const MAX_CREATE_ATTEMPTS: usize = 3;

/// effective_limit
///
/// Non-numeric or non-positive values fall back to `default`; anything above
/// `default` is clamped to it.
pub fn effective_limit(raw: Option<&str>, default: usize) -> usize {
    raw.and_then(|raw| raw.trim().parse::<i64>().ok())
        .filter(|limit| *limit >= 1)
        .map(|limit| usize::try_from(limit).unwrap_or(default).min(default))
        .unwrap_or(default)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

// --- Handlers ---

/// list_entries
///
/// [Public Route] Entries stored under `key`, newest first, after the
/// visibility filter. Always an array, empty when nothing is visible.
#[utoipa::path(
    get,
    path = "/",
    params(ListEntriesParams),
    responses(
        (status = 200, description = "Visible entries", body = [Entry]),
        (status = 400, description = "Missing or reserved key", body = MessageResponse)
    )
)]
pub async fn list_entries(
    auth: AuthOutcome,
    State(state): State<AppState>,
    params: Result<Query<ListEntriesParams>, QueryRejection>,
) -> Result<Json<Vec<Entry>>, ApiError> {
    // 1. Input Validation
    // A malformed query string (e.g. a repeated `key`) is a 400 with a JSON
    // body, like every other rejection.
    let Query(params) = params.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let key = validate_user_key(params.key.as_deref())?;

    // 2. Store Query
    // The limit bounds what the store returns; visibility is applied after,
    // so a page may come back shorter than `limit`.
    let mut query = EntryQuery::new(
        key,
        effective_limit(params.limit.as_deref(), state.config.query_limit),
    );
    query.start = non_empty(params.start);
    query.end = non_empty(params.end);
    query.correlation_id = non_empty(params.id);

    let entries = state.store.query(EntryKind::UserData, &query).await?;

    // 3. Visibility Filter
    // Applied to the whole page, never to part of it.
    let fetched = entries.len();
    let visible = VisibilityFilter::filter(entries, &auth.identity);

    tracing::debug!(key = %key, fetched, visible = visible.len(), user = %auth.identity.user, "listed entries");
    Ok(Json(visible))
}

/// create_entry
///
/// [Public Route] Stores a new entry. `owner` is always the resolved caller
/// and `created` comes from the server clock; `readable` defaults to `*`.
#[utoipa::path(
    post,
    path = "/",
    request_body = CreateEntryRequest,
    responses(
        (status = 200, description = "Created", body = CreatedResponse),
        (status = 400, description = "Malformed body or reserved key", body = MessageResponse),
        (status = 403, description = "Private key of another user", body = MessageResponse)
    )
)]
pub async fn create_entry(
    auth: AuthOutcome,
    State(state): State<AppState>,
    payload: Result<Json<CreateEntryRequest>, JsonRejection>,
) -> Result<Json<CreatedResponse>, ApiError> {
    // 1. Input Validation
    let Json(payload) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let caller = &auth.identity;

    let key = validate_user_key(payload.key.as_deref())?;

    // 2. Write Authorization
    // Anyone may write, except to another user's `privateKey-*` key.
    OwnershipGuard::check_create(key, caller)?;
    let data = payload
        .data
        .ok_or_else(|| ApiError::BadRequest("Data field is required".to_string()))?;

    // 3. Build the Entry
    // The owner is always the resolved caller, whatever the body says.
    let mut entry = Entry {
        key: key.to_string(),
        created: state.clock.next_stamp(),
        readable: non_empty(payload.readable).unwrap_or_else(|| READABLE_PUBLIC.to_string()),
        owner: caller.user.clone(),
        data,
        id: non_empty(payload.id),
    };

    // 4. Insert
    // An occupied `(key, created)` slot is never overwritten. On a clash the
    // entry is re-stamped and the insert retried.
    let mut attempt = 1;
    loop {
        match state.store.put(EntryKind::UserData, entry.clone()).await {
            Ok(()) => break,
            Err(StoreError::Conflict { created, .. }) if attempt < MAX_CREATE_ATTEMPTS => {
                tracing::warn!(key = %entry.key, created = %created, attempt, "created stamp taken, re-stamping");
                entry.created = state.clock.next_stamp();
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
    tracing::info!(key = %entry.key, created = %entry.created, owner = %entry.owner, "entry created");

    Ok(Json(CreatedResponse {
        message: "Item created successfully".to_string(),
        item: entry,
    }))
}

/// delete_entries
///
/// [Authenticated Route] Deletes one entry (`key` + `created`) or every entry
/// of `key` carrying correlation `id`. The target is read from the JSON body,
/// or from the query string when the request has no JSON body.
///
/// Group deletes filter to the caller's deletable subset first and then issue
/// one store delete per entry. They are not atomic: a store failure partway
/// leaves earlier deletes applied. Deletes are idempotent, so retrying is safe.
#[utoipa::path(
    delete,
    path = "/",
    request_body = DeleteEntryRequest,
    responses(
        (status = 200, description = "Deleted", body = DeletedResponse),
        (status = 400, description = "Malformed target or reserved key", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = MessageResponse),
        (status = 403, description = "Not owner or admin", body = MessageResponse)
    )
)]
pub async fn delete_entries(
    auth: AuthOutcome,
    State(state): State<AppState>,
    query_target: Result<Query<DeleteEntryRequest>, QueryRejection>,
    body: Result<Json<DeleteEntryRequest>, JsonRejection>,
) -> Result<Json<DeletedResponse>, ApiError> {
    // 1. Authentication Gate
    // Unlike reads and writes, deletes never downgrade to anonymous. This runs
    // before any target validation, so an anonymous caller always sees 401.
    if !auth.is_authorized {
        return Err(ApiError::Unauthorized(
            auth.message
                .unwrap_or_else(|| "Authentication required".to_string()),
        ));
    }

    // 2. Target Resolution
    // The JSON body wins; without a JSON body the query string is used.
    let target = match body {
        Ok(Json(target)) => target,
        Err(JsonRejection::MissingJsonContentType(_)) => {
            let Query(target) = query_target
                .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
            target
        }
        Err(rejection) => return Err(ApiError::BadRequest(rejection.body_text())),
    };
    let caller = &auth.identity;
    let key = validate_user_key(target.key.as_deref())?;
    let created = non_empty(target.created);

    // 3. Dispatch
    // `id` selects a group (optionally narrowed to one `created`); `created`
    // alone selects a single entry.
    let deleted = match (non_empty(target.id), created) {
        (Some(id), created) => {
            let mut query = EntryQuery::new(key, usize::MAX).with_correlation_id(id);
            if let Some(created) = created {
                query.start = Some(created.clone());
                query.end = Some(created);
            }
            delete_group(&state, &query, caller).await?
        }
        (None, Some(created)) => delete_single(&state, key, &created, caller).await?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "key and created (or id) parameters are required".to_string(),
            ));
        }
    };

    Ok(Json(DeletedResponse {
        message: "Item deleted successfully".to_string(),
        deleted,
    }))
}

/// delete_single
///
/// Deletes `(key, created)` if the caller may. A missing entry is a successful
/// no-op so retries are safe.
async fn delete_single(
    state: &AppState,
    key: &str,
    created: &str,
    caller: &Identity,
) -> Result<usize, ApiError> {
    let existing = state
        .store
        .query(EntryKind::UserData, &EntryQuery::exact(key, created))
        .await?;
    let Some(entry) = existing.first() else {
        // Already gone.
        return Ok(0);
    };
    if !OwnershipGuard::can_delete(entry, caller) {
        return Err(ApiError::Forbidden(
            "Only the owner or an admin may delete this item".to_string(),
        ));
    }
    state.store.delete(EntryKind::UserData, key, created).await?;
    tracing::info!(key = %key, created = %created, user = %caller.user, "entry deleted");
    Ok(1)
}

/// delete_group
///
/// 1. Reads every entry matching the group query.
/// 2. Filters to the caller's deletable subset before touching anything; an
///    empty subset is a 403 with nothing deleted.
/// 3. Deletes the subset one entry at a time, stopping at the first failure.
async fn delete_group(
    state: &AppState,
    query: &EntryQuery,
    caller: &Identity,
) -> Result<usize, ApiError> {
    let matched = state.store.query(EntryKind::UserData, query).await?;
    if matched.is_empty() {
        return Ok(0);
    }

    let total = matched.len();
    let authorized = OwnershipGuard::authorized_subset(matched, caller);
    if authorized.is_empty() {
        return Err(ApiError::Forbidden(
            "None of the matched items may be deleted by this caller".to_string(),
        ));
    }

    for (done, entry) in authorized.iter().enumerate() {
        if let Err(err) = state
            .store
            .delete(EntryKind::UserData, &entry.key, &entry.created)
            .await
        {
            tracing::error!(
                key = %query.key,
                deleted = done,
                remaining = authorized.len() - done,
                "group delete failed partway"
            );
            return Err(err.into());
        }
    }

    tracing::info!(
        key = %query.key,
        matched = total,
        deleted = authorized.len(),
        user = %caller.user,
        "entry group deleted"
    );
    Ok(authorized.len())
}

/// get_auth
///
/// [Authenticated Route] The caller's resolved identity, or 401.
#[utoipa::path(
    get,
    path = "/auth",
    responses(
        (status = 200, description = "Resolved identity", body = Identity),
        (status = 401, description = "Not authenticated", body = MessageResponse)
    )
)]
pub async fn get_auth(auth: AuthOutcome) -> Result<Json<Identity>, ApiError> {
    if !auth.is_authorized {
        return Err(ApiError::Unauthorized(
            auth.message
                .unwrap_or_else(|| "Authentication required".to_string()),
        ));
    }
    Ok(Json(auth.identity))
}

/// CORS preflight. The CORS layer adds the headers; no auth is consulted.
pub async fn preflight() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "OK".to_string(),
    })
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}
