#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header, jwk::JwkSet};
use kva_store::{
    AppConfig, AppState, create_router,
    auth::{AuthError, KeySource, PublicKeyCache},
    models::{Entry, EntryKind},
    repository::{EntryStore, InMemoryEntryStore, StoreState},
};
use serde_json::{Value, json};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};
use tower::util::ServiceExt;

// --- Test Identities ---

pub const USER_TOKEN: &str = "user-secret-token";
pub const OTHER_TOKEN: &str = "other-secret-token";
pub const ADMIN_TOKEN: &str = "admin-secret-token";
pub const DUPLICATE_TOKEN: &str = "duplicate-secret-token";

pub const TEST_USER: &str = "testUser";
pub const OTHER_USER: &str = "otherUser";
pub const ADMIN_USER: &str = "admin@example.com";

// --- Signing Key (RFC 8032 test vector 1) ---

pub const TEST_KID: &str = "test-key";

const ED25519_SEED: [u8; 32] = [
    0x9d, 0x61, 0xb1, 0x9d, 0xef, 0xfd, 0x5a, 0x60, 0xba, 0x84, 0x4a, 0xf4, 0x92, 0xec, 0x2c,
    0xc4, 0x44, 0x49, 0xc5, 0x69, 0x7b, 0x32, 0x69, 0x19, 0x70, 0x3b, 0xac, 0x03, 0x1c, 0xae,
    0x7f, 0x60,
];

/// Base64url public key matching `ED25519_SEED`.
pub const ED25519_PUBLIC_X: &str = "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo";

fn ed25519_pkcs8_der() -> Vec<u8> {
    let mut der = vec![
        0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22,
        0x04, 0x20,
    ];
    der.extend_from_slice(&ED25519_SEED);
    der
}

pub fn test_jwk_set() -> JwkSet {
    serde_json::from_value(json!({
        "keys": [{
            "kty": "OKP",
            "crv": "Ed25519",
            "x": ED25519_PUBLIC_X,
            "kid": TEST_KID,
            "alg": "EdDSA",
            "use": "sig"
        }]
    }))
    .unwrap()
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Signs `claims` with the test Ed25519 key under `kid`.
pub fn sign_token(claims: &Value, kid: &str) -> String {
    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_ed_der(&ed25519_pkcs8_der());
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

/// A valid one-hour token for `email`.
pub fn token_for(email: &str) -> String {
    sign_token(
        &json!({ "sub": "subject-id", "email": email, "exp": now_secs() + 3600 }),
        TEST_KID,
    )
}

// --- Key Source ---

/// StaticKeySource
///
/// Serves a fixed key set, counts fetches, and can be told to fail or to
/// answer slowly.
pub struct StaticKeySource {
    set: JwkSet,
    pub fetches: AtomicUsize,
    pub fail: AtomicBool,
    delay: Duration,
}

impl StaticKeySource {
    pub fn new(set: JwkSet) -> Self {
        Self::with_delay(set, Duration::ZERO)
    }

    pub fn with_delay(set: JwkSet, delay: Duration) -> Self {
        Self {
            set,
            fetches: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay,
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuthError::KeyFetch("simulated outage".to_string()));
        }
        Ok(self.set.clone())
    }
}

// --- Store Fixtures ---

pub fn system_record(key: &str, created: &str, data: Value) -> Entry {
    Entry {
        key: key.to_string(),
        created: created.to_string(),
        readable: "system".to_string(),
        owner: "system".to_string(),
        data,
        id: None,
    }
}

pub fn entry(key: &str, created: &str, owner: &str, readable: &str) -> Entry {
    Entry {
        key: key.to_string(),
        created: created.to_string(),
        readable: readable.to_string(),
        owner: owner.to_string(),
        data: json!("payload"),
        id: None,
    }
}

/// Store holding the control records every test relies on. One mapping is
/// stored as a JSON string, as older tooling wrote them.
pub async fn seeded_store() -> Arc<InMemoryEntryStore> {
    let store = Arc::new(InMemoryEntryStore::new());
    let t = "2024-01-01T00:00:00.000Z";
    let records = [
        (
            EntryKind::SecretTokenMapping,
            system_record(USER_TOKEN, t, json!("{\"user\":\"testUser\"}")),
        ),
        (
            EntryKind::SecretTokenMapping,
            system_record(OTHER_TOKEN, t, json!({ "user": OTHER_USER })),
        ),
        (
            EntryKind::SecretTokenMapping,
            system_record(ADMIN_TOKEN, t, json!({ "user": ADMIN_USER })),
        ),
        (
            EntryKind::SecretTokenMapping,
            system_record(DUPLICATE_TOKEN, t, json!({ "user": TEST_USER })),
        ),
        (
            EntryKind::SecretTokenMapping,
            system_record(
                DUPLICATE_TOKEN,
                "2024-01-02T00:00:00.000Z",
                json!({ "user": OTHER_USER }),
            ),
        ),
        (
            EntryKind::RoleAssignment,
            system_record(ADMIN_USER, t, json!({ "role": "admin" })),
        ),
    ];
    for (kind, record) in records {
        store.put(kind, record).await.unwrap();
    }
    store
}

// --- Application Harness ---

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryEntryStore>,
    pub keys: Arc<StaticKeySource>,
}

pub async fn spawn_app() -> TestApp {
    let store = seeded_store().await;
    let keys = Arc::new(StaticKeySource::new(test_jwk_set()));
    let router = app_with(store.clone() as StoreState, keys.clone());
    TestApp {
        router,
        store,
        keys,
    }
}

pub fn app_with(store: StoreState, keys: Arc<StaticKeySource>) -> Router {
    let cache = Arc::new(PublicKeyCache::new(keys, Duration::from_secs(3600)));
    create_router(AppState::new(store, cache, AppConfig::default()))
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response: Response<Body> = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

pub fn get(uri: &str, secret_token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = secret_token {
        builder = builder.header("SecretToken", token);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn json_request(method: &str, body: Value, secret_token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri("/")
        .header("Content-Type", "application/json");
    if let Some(token) = secret_token {
        builder = builder.header("SecretToken", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}
