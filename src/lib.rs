use axum::{
    Router,
    extract::FromRef,
    http::{HeaderName, header},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod policy;
pub mod repository;
pub mod seed;

// Routing, split per resource.
pub mod routes;
use routes::{auth::auth_routes, entries::entry_routes};

// --- Public Re-exports ---

pub use auth::{AuthOutcome, Authorizer, AuthorizerState, PublicKeyCache};
pub use clock::MonotonicClock;
pub use config::AppConfig;
pub use error::{ApiError, StoreError};
pub use repository::{EntryStore, InMemoryEntryStore, PostgresEntryStore, StoreState};

/// ApiDoc
///
/// Generated OpenAPI document, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_entries, handlers::create_entry, handlers::delete_entries,
        handlers::get_auth
    ),
    components(
        schemas(
            models::Entry, models::Identity, models::CreateEntryRequest,
            models::DeleteEntryRequest, models::CreatedResponse, models::DeletedResponse,
            models::MessageResponse,
        )
    ),
    tags(
        (name = "kva-store", description = "Multi-tenant key/value-array store")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single container of shared services. Cloned per request; every field
/// is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Ordered entry store (Postgres or in-memory).
    pub store: StoreState,
    /// Request authorization, holding the signing key cache.
    pub authorizer: AuthorizerState,
    /// Source of `created` stamps.
    pub clock: Arc<MonotonicClock>,
    pub config: AppConfig,
}

impl AppState {
    /// new
    ///
    /// Wires the authorizer over `store` and `keys`, with token settings taken
    /// from `config`.
    pub fn new(store: StoreState, keys: Arc<PublicKeyCache>, config: AppConfig) -> Self {
        let settings = auth::TokenSettings {
            audience: config.jwt_audience.clone(),
            issuer: config.jwt_issuer.clone(),
        };
        let authorizer = Arc::new(Authorizer::new(store.clone(), keys, settings));
        Self {
            store,
            authorizer,
            clock: Arc::new(MonotonicClock::new()),
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for StoreState {
    fn from_ref(app_state: &AppState) -> StoreState {
        app_state.store.clone()
    }
}

impl FromRef<AppState> for AuthorizerState {
    fn from_ref(app_state: &AppState) -> AuthorizerState {
        app_state.authorizer.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the routes, the observability layers and the CORS layer.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS: permissive, every response carries the headers.
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_TYPE]);

    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Routes
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(entry_routes())
        .merge(auth_routes())
        .with_state(state);

    // 3. Observability: request id, tracing span, id propagation.
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS outermost so preflights never reach the handlers.
        .layer(cors)
}

/// trace_span_logger
///
/// Span for one request, correlated by its `x-request-id`.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
