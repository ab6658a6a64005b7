use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Entry Router
///
/// The single key/value resource. Reads are filtered per caller, writes are
/// owned by the caller, deletes require ownership or the admin role.
pub fn entry_routes() -> Router<AppState> {
    Router::new().route(
        "/",
        // GET /?key=...&limit=...&start=...&end=...&id=...
        get(handlers::list_entries)
            // POST / {key, readable?, data, id?}
            .post(handlers::create_entry)
            // DELETE / {key, created} or {key, id}
            .delete(handlers::delete_entries)
            .options(handlers::preflight)
            .fallback(handlers::method_not_allowed),
    )
}
