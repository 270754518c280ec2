//! Token validation against a live (mock) OIDC provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{JWKS_B, KEY_A, KEY_B, MockIdp, now, sign, sign_with};
use routeros_mcp_auth::authz::Environment;
use routeros_mcp_auth::identity::{DeviceScope, TokenValidator, UserRole, ValidationError};
use serde_json::json;

#[tokio::test]
async fn valid_token_round_trip() {
    // GIVEN: a provider and a token it signed
    let idp = MockIdp::start().await;
    let validator = idp.validator();
    let mut claims = idp.claims("user-42");
    claims["email"] = json!("alice@example.net");
    claims["preferred_username"] = json!("alice");
    claims["role"] = json!("ops_rw");

    // WHEN: validated
    let user = validator.validate(&sign(&claims)).await.unwrap();

    // THEN: the normalized user reflects the claims
    assert_eq!(user.sub, "user-42");
    assert_eq!(user.email.as_deref(), Some("alice@example.net"));
    assert_eq!(user.display_name.as_deref(), Some("alice"));
    assert_eq!(user.role, UserRole::OpsRw);
    assert_eq!(idp.state.discovery_hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(idp.jwks_hits(), 1);
}

#[tokio::test]
async fn keys_and_tokens_are_cached() {
    let idp = MockIdp::start().await;
    let validator = idp.validator();

    let first = sign(&idp.claims("a"));
    let second = sign(&idp.claims("b"));
    validator.validate(&first).await.unwrap();
    validator.validate(&first).await.unwrap();
    validator.validate(&second).await.unwrap();

    // One JWKS fetch for both tokens, two signature checks for three calls
    assert_eq!(idp.jwks_hits(), 1);
    let stats = validator.stats();
    assert_eq!(stats.verifications, 2);
    assert_eq!(stats.token_cache.hits, 1);
    assert_eq!(stats.token_cache.size, 2);
}

#[tokio::test]
async fn concurrent_cold_start_fetches_once() {
    // GIVEN: a slow JWKS endpoint and an empty cache
    let idp = MockIdp::start().await;
    idp.set_jwks_delay(Duration::from_millis(100));
    let validator = Arc::new(idp.validator());

    // WHEN: twenty distinct tokens are validated at once
    let handles: Vec<_> = (0..20)
        .map(|i| {
            let validator = Arc::clone(&validator);
            let token = sign(&idp.claims(&format!("user-{i}")));
            tokio::spawn(async move { validator.validate(&token).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // THEN: the provider saw a single JWKS request
    assert_eq!(idp.jwks_hits(), 1);
}

#[tokio::test]
async fn stale_keys_survive_provider_outage() {
    // GIVEN: keys cached with a tiny TTL
    let idp = MockIdp::start().await;
    let mut config = idp.oidc_config();
    config.jwks_cache_ttl = Duration::from_millis(10);
    let validator = TokenValidator::new(&config, Environment::Lab).unwrap();
    validator.validate(&sign(&idp.claims("warm"))).await.unwrap();

    // WHEN: the TTL lapses and the provider goes down
    tokio::time::sleep(Duration::from_millis(30)).await;
    idp.set_failing(true);

    // THEN: a new token still validates against the stale set
    let user = validator.validate(&sign(&idp.claims("during-outage"))).await.unwrap();
    assert_eq!(user.sub, "during-outage");
}

#[tokio::test]
async fn outage_without_cache_is_provider_unavailable() {
    let idp = MockIdp::start().await;
    idp.set_failing(true);

    let err = idp
        .validator()
        .validate(&sign(&idp.claims("u")))
        .await
        .unwrap_err();

    assert!(matches!(err, ValidationError::ProviderUnavailable(_)));
    assert_eq!(err.status_code(), 503);
    assert_eq!(err.public_message(), "identity provider unavailable");
}

#[tokio::test]
async fn caller_deadline_bounds_key_fetch() {
    // GIVEN: a provider that takes far longer than the caller will wait
    let idp = MockIdp::start().await;
    idp.set_jwks_delay(Duration::from_millis(1500));
    let validator = idp.validator();

    // WHEN: validating with a 100ms deadline
    let started = std::time::Instant::now();
    let err = validator
        .validate_within(&sign(&idp.claims("u")), Duration::from_millis(100))
        .await
        .unwrap_err();

    // THEN: it gives up promptly with ProviderUnavailable
    assert!(matches!(err, ValidationError::ProviderUnavailable(_)));
    assert!(started.elapsed() < Duration::from_millis(1000));
}

#[tokio::test]
async fn caller_deadline_covers_waiting_on_another_refresh() {
    // GIVEN: one validation is already stuck behind a slow JWKS endpoint
    let idp = MockIdp::start().await;
    idp.set_jwks_delay(Duration::from_millis(1500));
    let validator = Arc::new(idp.validator());
    let slow = {
        let validator = Arc::clone(&validator);
        let token = sign(&idp.claims("a"));
        tokio::spawn(async move { validator.validate(&token).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // WHEN: a second caller validates with a 100ms deadline
    let started = std::time::Instant::now();
    let err = validator
        .validate_within(&sign(&idp.claims("b")), Duration::from_millis(100))
        .await
        .unwrap_err();

    // THEN: it gives up on its own budget instead of waiting for the first
    assert!(matches!(err, ValidationError::ProviderUnavailable(_)));
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert!(slow.await.unwrap().is_ok());
}

#[tokio::test]
async fn impatient_caller_does_not_fail_concurrent_validations() {
    // GIVEN: a healthy provider that answers in 300ms
    let idp = MockIdp::start().await;
    idp.set_jwks_delay(Duration::from_millis(300));
    let validator = idp.validator();
    let (hasty_token, patient_token) = (sign(&idp.claims("h")), sign(&idp.claims("p")));

    // WHEN: a 20ms-deadline caller and a default caller start together
    let (hasty, patient) = tokio::join!(
        validator.validate_within(&hasty_token, Duration::from_millis(20)),
        validator.validate(&patient_token),
    );

    // THEN: only the impatient caller sees ProviderUnavailable
    assert!(matches!(hasty, Err(ValidationError::ProviderUnavailable(_))));
    assert_eq!(patient.unwrap().sub, "p");
}

#[tokio::test]
async fn oversized_cache_ttls_do_not_panic() {
    // GIVEN: TTLs the config loader accepts but that overflow the clock
    let idp = MockIdp::start().await;
    let config = routeros_mcp_auth::config::OidcConfig {
        jwks_cache_ttl: Duration::from_secs(u64::MAX),
        token_cache_ttl: Duration::from_secs(u64::MAX),
        ..idp.oidc_config()
    };
    let validator = TokenValidator::new(&config, Environment::Lab).unwrap();
    let token = sign(&idp.claims("u"));

    // WHEN: the same token is validated twice
    validator.validate(&token).await.unwrap();
    let user = validator.validate(&token).await.unwrap();

    // THEN: both calls succeed and the second is served from cache
    assert_eq!(user.sub, "u");
    assert_eq!(idp.jwks_hits(), 1);
    assert_eq!(validator.stats().token_cache.hits, 1);
}

#[tokio::test]
async fn key_rotation_is_picked_up_after_ttl() {
    // GIVEN: a validator that cached key A
    let idp = MockIdp::start().await;
    let mut config = idp.oidc_config();
    config.jwks_cache_ttl = Duration::from_millis(10);
    let validator = TokenValidator::new(&config, Environment::Lab).unwrap();
    validator.validate(&sign(&idp.claims("before"))).await.unwrap();

    // WHEN: the provider rotates to key B
    idp.set_jwks(JWKS_B);
    tokio::time::sleep(Duration::from_millis(30)).await;

    // THEN: B-signed tokens validate and A-signed ones no longer do
    let rotated = sign_with(&idp.claims("after"), KEY_B, Some("key-b"));
    assert_eq!(validator.validate(&rotated).await.unwrap().sub, "after");

    let old = sign_with(&idp.claims("old"), KEY_A, Some("key-a"));
    assert_eq!(
        validator.validate(&old).await.unwrap_err(),
        ValidationError::InvalidToken("invalid signature".to_string())
    );
}

#[tokio::test]
async fn expiry_and_skew_against_live_provider() {
    let idp = MockIdp::start().await;
    let validator = idp.validator();

    let mut recent = idp.claims("recent");
    recent["exp"] = json!(now() - 10);
    assert!(validator.validate(&sign(&recent)).await.is_ok());

    let mut stale = idp.claims("stale");
    stale["exp"] = json!(now() - 40);
    assert_eq!(
        validator.validate(&sign(&stale)).await.unwrap_err(),
        ValidationError::InvalidToken("token expired".to_string())
    );
}

#[tokio::test]
async fn scope_claim_shapes() {
    let idp = MockIdp::start().await;
    let validator = idp.validator();

    let mut csv = idp.claims("csv");
    csv["device_scope"] = json!("rtr-1, rtr-2");
    assert_eq!(
        validator.validate(&sign(&csv)).await.unwrap().device_scope,
        DeviceScope::from_ids(["rtr-1", "rtr-2"])
    );

    let mut mixed = idp.claims("mixed");
    mixed["device_scope"] = json!(["rtr-1", 7]);
    assert_eq!(
        validator.validate(&sign(&mixed)).await.unwrap().device_scope,
        DeviceScope::Unrestricted
    );
}

#[tokio::test]
async fn unknown_role_falls_back_to_read_only() {
    let idp = MockIdp::start().await;
    let mut claims = idp.claims("u");
    claims["role"] = json!("superuser");

    let user = idp.validator().validate(&sign(&claims)).await.unwrap();

    assert_eq!(user.role, UserRole::ReadOnly);
}

#[tokio::test]
async fn validators_do_not_share_caches() {
    let idp = MockIdp::start().await;
    let token = sign(&idp.claims("u"));

    let a = idp.validator();
    let b = idp.validator();
    a.validate(&token).await.unwrap();
    b.validate(&token).await.unwrap();

    assert_eq!(idp.jwks_hits(), 2);
    assert_eq!(b.stats().token_cache.hits, 0);
}
