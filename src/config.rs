use std::{env, str::FromStr, time::Duration};

use crate::auth::keys::DEFAULT_KEY_TTL;

/// Default and maximum number of entries a single query returns.
pub const MAX_QUERY_LIMIT: usize = 100;

/// Google's public JWKS endpoint.
pub const DEFAULT_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";

/// AppConfig
///
/// Holds the application's entire configuration. Immutable once loaded and
/// pulled into handlers via FromRef.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Selects log format and which settings are mandatory.
    pub env: Env,
    // Postgres connection string. Absent locally means the in-memory store.
    pub db_url: Option<String>,
    // Address the HTTP server binds to.
    pub bind_addr: String,
    // JWKS endpoint serving the bearer token signing keys.
    pub jwks_url: String,
    pub jwt_audience: Option<String>,
    pub jwt_issuer: Option<String>,
    // How long a fetched key set stays usable.
    pub key_cache_ttl: Duration,
    // Upper bound on a single key set fetch.
    pub key_fetch_timeout: Duration,
    // Default and ceiling of the `limit` query parameter.
    pub query_limit: usize,
    pub seed: SeedConfig,
}

/// SeedConfig
///
/// Bootstrap control records written at startup (see `seed`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SeedConfig {
    pub admin_user: Option<String>,
    pub admin_user_token: Option<String>,
    pub authenticated_user_token: Option<String>,
}

/// Env
///
/// Defines the runtime context: `Local` runs without a database and prints
/// human-readable logs; `Production` requires Postgres and logs JSON.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

impl Default for AppConfig {
    /// Safe, non-panicking values for test setup.
    fn default() -> Self {
        Self {
            env: Env::Local,
            db_url: None,
            bind_addr: "127.0.0.1:3000".to_string(),
            jwks_url: DEFAULT_JWKS_URL.to_string(),
            jwt_audience: None,
            jwt_issuer: None,
            key_cache_ttl: DEFAULT_KEY_TTL,
            key_fetch_timeout: Duration::from_secs(10),
            query_limit: MAX_QUERY_LIMIT,
            seed: SeedConfig::default(),
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> T {
    match optional_var(name) {
        Some(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("FATAL: {name} must be a valid number, got {raw:?}")),
        None => default,
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads every setting from the environment, applying the **fail-fast**
    /// principle.
    ///
    /// # Panics
    /// Panics when `DATABASE_URL` is missing in production, or when a numeric
    /// setting does not parse. A misconfigured server never starts.
    pub fn load() -> Self {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let db_url = match env {
            Env::Production => Some(
                optional_var("DATABASE_URL")
                    .expect("FATAL: DATABASE_URL must be set in production."),
            ),
            Env::Local => optional_var("DATABASE_URL"),
        };

        let defaults = Self::default();
        let bind_addr = optional_var("BIND_ADDR").unwrap_or_else(|| match env {
            Env::Production => "0.0.0.0:3000".to_string(),
            Env::Local => defaults.bind_addr.clone(),
        });

        let query_limit =
            parsed_var("QUERY_LIMIT", MAX_QUERY_LIMIT).clamp(1, MAX_QUERY_LIMIT);

        Self {
            env,
            db_url,
            bind_addr,
            jwks_url: optional_var("JWKS_URL").unwrap_or(defaults.jwks_url),
            jwt_audience: optional_var("JWT_AUDIENCE"),
            jwt_issuer: optional_var("JWT_ISSUER"),
            key_cache_ttl: Duration::from_secs(parsed_var(
                "KEY_CACHE_TTL_SECS",
                DEFAULT_KEY_TTL.as_secs(),
            )),
            key_fetch_timeout: Duration::from_secs(parsed_var("KEY_FETCH_TIMEOUT_SECS", 10)),
            query_limit,
            seed: SeedConfig {
                admin_user: optional_var("ADMIN_USER"),
                admin_user_token: optional_var("ADMIN_USER_SECRET_TOKEN"),
                authenticated_user_token: optional_var("AUTHENTICATED_USER_SECRET_TOKEN"),
            },
        }
    }
}
