use crate::{AppState, handlers};
use axum::{Json, Router, routing::get};
use serde_json::json;

/// Auth Router
///
/// `/auth` reports who the service thinks the caller is; unlike the entry
/// routes it answers 401 instead of downgrading to anonymous.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers.
        .route("/health", get(|| async { Json(json!({ "message": "ok" })) }))
        .route(
            "/auth",
            get(handlers::get_auth)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
}
