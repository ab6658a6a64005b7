use kva_store::{
    AppState,
    auth::{HttpKeySource, PublicKeyCache},
    config::{AppConfig, Env},
    create_router,
    repository::{InMemoryEntryStore, PostgresEntryStore, StoreState},
    seed::seed_system_records,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Boots configuration, logging, the store, the signing key cache and the
/// HTTP server.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG wins, otherwise verbose defaults for this crate.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kva_store=debug,tower_http=info,axum=trace".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            // JSON lines for the log aggregator.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Store: Postgres when configured, in-memory otherwise (local only).
    let store: StoreState = match &config.db_url {
        Some(db_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(db_url)
                .await
                .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");
            Arc::new(PostgresEntryStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(InMemoryEntryStore::new())
        }
    };

    // 4. Signing key cache, built once and shared.
    let key_source = HttpKeySource::new(&config.jwks_url, config.key_fetch_timeout)
        .expect("FATAL: Failed to build the JWKS HTTP client.");
    let keys = Arc::new(PublicKeyCache::new(
        Arc::new(key_source),
        config.key_cache_ttl,
    ));

    let bind_addr = config.bind_addr.clone();
    let seed = config.seed.clone();
    let app_state = AppState::new(store, keys, config);

    // 5. Bootstrap control records.
    seed_system_records(app_state.store.as_ref(), &seed, &app_state.clock)
        .await
        .expect("FATAL: Failed to seed system records.");

    // 6. Router and server
    let app = create_router(app_state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind the HTTP listener. Check BIND_ADDR.");

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at /swagger-ui");

    axum::serve(listener, app)
        .await
        .expect("FATAL: HTTP server terminated unexpectedly.");
}
