mod common;

use common::{StaticKeySource, TEST_KID, test_jwk_set};
use jsonwebtoken::{Algorithm, jwk::JwkSet};
use kva_store::auth::{AuthError, PublicKeyCache};
use serde_json::json;
use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};
use tokio::task::JoinSet;

fn cache_over(source: Arc<StaticKeySource>, ttl: Duration) -> PublicKeyCache {
    PublicKeyCache::new(source, ttl)
}

#[tokio::test]
async fn test_keys_fetched_lazily_and_cached() {
    let source = Arc::new(StaticKeySource::new(test_jwk_set()));
    let cache = cache_over(source.clone(), Duration::from_secs(3600));

    assert_eq!(source.fetch_count(), 0);

    let keys = cache.get_keys().await.unwrap();
    assert!(keys.contains_key(TEST_KID));
    cache.get_keys().await.unwrap();
    cache.get_key(TEST_KID).await.unwrap();

    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn test_expired_keys_are_refetched() {
    let source = Arc::new(StaticKeySource::new(test_jwk_set()));
    let cache = cache_over(source.clone(), Duration::ZERO);

    cache.get_keys().await.unwrap();
    cache.get_keys().await.unwrap();

    assert_eq!(source.fetch_count(), 2);
}

#[tokio::test]
async fn test_failed_refresh_never_serves_expired_keys() {
    let source = Arc::new(StaticKeySource::new(test_jwk_set()));
    let cache = cache_over(source.clone(), Duration::ZERO);

    cache.get_keys().await.unwrap();
    source.fail.store(true, Ordering::SeqCst);

    let result = cache.get_keys().await;
    assert!(matches!(result, Err(AuthError::KeyFetch(_))));

    // Recovers on the next successful fetch.
    source.fail.store(false, Ordering::SeqCst);
    assert!(cache.get_keys().await.is_ok());
}

#[tokio::test]
async fn test_empty_key_set_is_refetched() {
    let source = Arc::new(StaticKeySource::new(JwkSet { keys: vec![] }));
    let cache = cache_over(source.clone(), Duration::from_secs(3600));

    assert!(cache.get_keys().await.unwrap().is_empty());
    assert!(cache.get_keys().await.unwrap().is_empty());

    assert_eq!(source.fetch_count(), 2);
}

#[tokio::test]
async fn test_concurrent_refresh_is_single_flight() {
    let source = Arc::new(StaticKeySource::with_delay(
        test_jwk_set(),
        Duration::from_millis(50),
    ));
    let cache = Arc::new(cache_over(source.clone(), Duration::from_secs(3600)));

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let cache = cache.clone();
        tasks.spawn(async move { cache.get_keys().await.map(|keys| keys.len()) });
    }
    while let Some(result) = tasks.join_next().await {
        assert_eq!(result.unwrap().unwrap(), 1);
    }

    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn test_algorithms_pinned_by_key_type() {
    let set: JwkSet = serde_json::from_value(json!({
        "keys": [
            {
                "kty": "OKP", "crv": "Ed25519", "kid": "ed",
                "x": common::ED25519_PUBLIC_X
            },
            {
                "kty": "EC", "crv": "P-256", "kid": "ec",
                "x": "MKBCTNIcKUSDii11ySs3526iDZ8AiTo7Tu6KPAqv7D4",
                "y": "4Etl6SRW2YiLUrN5vfvVHuhp7x8PxltmWWlbbM4IFyM"
            },
            { "kty": "oct", "kid": "hmac", "k": "c2VjcmV0" },
            { "kty": "OKP", "crv": "Ed25519", "x": common::ED25519_PUBLIC_X }
        ]
    }))
    .unwrap();

    let source = Arc::new(StaticKeySource::new(set));
    let keys = cache_over(source, Duration::from_secs(3600))
        .get_keys()
        .await
        .unwrap();

    assert_eq!(keys["ed"].algorithms, vec![Algorithm::EdDSA]);
    assert_eq!(keys["ec"].algorithms, vec![Algorithm::ES256]);
    // Symmetric keys and keys without a kid are never trusted.
    assert!(!keys.contains_key("hmac"));
    assert_eq!(keys.len(), 2);
}
