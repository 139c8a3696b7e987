//! End-to-end verification tests.
//!
//! A policy snapshot is applied to a controller whose Key Cache fetches from
//! a mock JWKS server; requests are then verified against the published
//! plans.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use authn_controller::controller::{AuthnController, ConfigSnapshot};
use async_trait::async_trait;
use authn_controller::keys::{CacheState, FetchError, HttpJwksFetcher, JwksFetcher, KeyCache, KeySet};
use authn_controller::providers::ProviderRegistry;
use authn_controller::verifier::{
    RejectReason, RequestCredentials, RequestVerifier, VerificationOutcome,
};
use authn_test_utils::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn controller() -> AuthnController {
    let keys = KeyCache::new(Arc::new(HttpJwksFetcher::new()));
    let verifier = RequestVerifier::new(keys.clone(), Duration::from_secs(60));
    AuthnController::new(ProviderRegistry::default(), keys, verifier)
}

fn apply(controller: &AuthnController, policy: PolicyBuilder) {
    let snapshot = ConfigSnapshot::from_json(&policy.to_bytes()).unwrap();
    let report = controller.apply(&snapshot);
    assert!(report.is_clean(), "unexpected errors: {report:?}");
}

/// Wait until every endpoint in the cache has been fetched.
async fn wait_until_fresh(controller: &AuthnController) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let statuses = controller.key_cache().statuses();
        if !statuses.is_empty() && statuses.iter().all(|s| s.state == CacheState::Fresh) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "key cache never became fresh: {statuses:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn bearer(token: &str) -> RequestCredentials {
    RequestCredentials::new().with_header("Authorization", format!("Bearer {token}"))
}

fn example_provider(jwks_uri: &str) -> JwtProviderBuilder {
    JwtProviderBuilder::new(TEST_JWT_PROVIDER, jwks_uri)
        .issuer(TEST_ISSUER)
        .audiences(&[TEST_AUDIENCE])
}

/// Controller with `/api` bound to provider `example`, keys fetched.
async fn ready_controller(
    server: &MockJwksServer,
    require_credential: bool,
) -> AuthnController {
    let controller = controller();
    apply(
        &controller,
        PolicyBuilder::new()
            .jwt_provider(
                TEST_PROVIDER,
                vec![example_provider(&server.jwks_uri()).claim_to_header("x-jwt-sub", "sub")],
            )
            .route(TEST_ROUTE, &[TEST_PROVIDER], require_credential),
    );
    wait_until_fresh(&controller).await;
    controller
}

#[tokio::test]
async fn test_valid_token_is_authenticated() {
    let key = test_signing_key(1).unwrap();
    let server = MockJwksServer::start(&[&key]).await;
    let controller = ready_controller(&server, true).await;

    let token = TestTokenBuilder::new()
        .issuer(TEST_ISSUER)
        .audience(TEST_AUDIENCE)
        .for_subject("alice")
        .sign(&key);

    let outcome = controller.verify(TEST_ROUTE, &bearer(&token)).unwrap();
    match outcome {
        VerificationOutcome::Authenticated {
            provider,
            claims,
            headers,
        } => {
            assert_eq!(provider, TEST_PROVIDER);
            assert_eq!(claims.subject(), Some("alice"));
            assert_eq!(headers, vec![("x-jwt-sub".to_string(), "alice".to_string())]);
        }
        other => panic!("expected Authenticated, got {other:?}"),
    }

    controller.shutdown();
}

#[tokio::test]
async fn test_token_without_kid_tries_every_key() {
    let key = test_signing_key(1).unwrap();
    let other = test_signing_key(2).unwrap();
    let server = MockJwksServer::start(&[&other, &key]).await;
    let controller = ready_controller(&server, true).await;

    let token = TestTokenBuilder::new()
        .issuer(TEST_ISSUER)
        .audience(TEST_AUDIENCE)
        .without_kid()
        .sign(&key);

    let outcome = controller.verify(TEST_ROUTE, &bearer(&token)).unwrap();
    assert!(outcome.is_allowed(), "got {outcome:?}");

    controller.shutdown();
}

#[tokio::test]
async fn test_rsa_and_ec_tokens_are_authenticated() {
    let ed = test_signing_key(1).unwrap();
    let rsa = test_rs256_key().unwrap();
    let ec = test_es256_key().unwrap();
    let server = MockJwksServer::start(&[&ed, &rsa, &ec]).await;
    let controller = ready_controller(&server, true).await;

    for key in [&rsa, &ec] {
        let base = TestTokenBuilder::new()
            .issuer(TEST_ISSUER)
            .audience(TEST_AUDIENCE)
            .for_subject("carol");

        for builder in [base.clone(), base.without_kid()] {
            let token = builder.sign(key);
            match controller.verify(TEST_ROUTE, &bearer(&token)).unwrap() {
                VerificationOutcome::Authenticated { provider, claims, .. } => {
                    assert_eq!(provider, TEST_PROVIDER);
                    assert_eq!(claims.subject(), Some("carol"));
                }
                other => panic!("expected Authenticated for {:?}, got {other:?}", key.algorithm),
            }
        }
    }

    controller.shutdown();
}

#[tokio::test]
async fn test_token_algorithm_must_match_key() {
    let rsa = test_rs256_key().unwrap();
    let ec = test_es256_key().unwrap();
    let server = MockJwksServer::start(&[&rsa]).await;
    let controller = ready_controller(&server, true).await;

    // ES256 token naming the RSA key's kid
    let token = TestTokenBuilder::new()
        .issuer(TEST_ISSUER)
        .audience(TEST_AUDIENCE)
        .with_kid(&rsa.kid)
        .sign(&ec);

    assert_eq!(
        controller.verify(TEST_ROUTE, &bearer(&token)),
        Some(VerificationOutcome::Rejected(
            RejectReason::NoMatchingProvider
        ))
    );

    controller.shutdown();
}

#[tokio::test]
async fn test_missing_credential() {
    let key = test_signing_key(1).unwrap();
    let server = MockJwksServer::start(&[&key]).await;

    let required = ready_controller(&server, true).await;
    assert_eq!(
        required.verify(TEST_ROUTE, &RequestCredentials::new()),
        Some(VerificationOutcome::Rejected(RejectReason::MissingCredential))
    );
    required.shutdown();

    let optional = ready_controller(&server, false).await;
    assert_eq!(
        optional.verify(TEST_ROUTE, &RequestCredentials::new()),
        Some(VerificationOutcome::Unauthenticated)
    );
    optional.shutdown();
}

#[tokio::test]
async fn test_unknown_route_is_not_enforced() {
    let key = test_signing_key(1).unwrap();
    let server = MockJwksServer::start(&[&key]).await;
    let controller = ready_controller(&server, true).await;

    assert!(controller
        .verify("/other", &RequestCredentials::new())
        .is_none());

    controller.shutdown();
}

#[tokio::test]
async fn test_pending_keys_are_unverifiable() {
    let key = test_signing_key(1).unwrap();
    let server = MockJwksServer::failing(503).await;
    let controller = controller();
    apply(
        &controller,
        PolicyBuilder::new()
            .jwt_provider(TEST_PROVIDER, vec![example_provider(&server.jwks_uri())])
            .route(TEST_ROUTE, &[TEST_PROVIDER], true),
    );

    let token = TestTokenBuilder::new()
        .issuer(TEST_ISSUER)
        .audience(TEST_AUDIENCE)
        .sign(&key);

    let outcome = controller.verify(TEST_ROUTE, &bearer(&token)).unwrap();
    assert_eq!(outcome, VerificationOutcome::Unverifiable);
    assert!(!outcome.is_allowed());

    controller.shutdown();
}

#[tokio::test]
async fn test_wrong_signing_key_matches_no_provider() {
    let key = test_signing_key(1).unwrap();
    let attacker = test_signing_key(9).unwrap().with_kid(&key.kid);
    let server = MockJwksServer::start(&[&key]).await;
    let controller = ready_controller(&server, true).await;

    let token = TestTokenBuilder::new()
        .issuer(TEST_ISSUER)
        .audience(TEST_AUDIENCE)
        .sign(&attacker);

    assert_eq!(
        controller.verify(TEST_ROUTE, &bearer(&token)),
        Some(VerificationOutcome::Rejected(
            RejectReason::NoMatchingProvider
        ))
    );

    controller.shutdown();
}

#[tokio::test]
async fn test_issuer_mismatch_matches_no_provider() {
    let key = test_signing_key(1).unwrap();
    let server = MockJwksServer::start(&[&key]).await;
    let controller = ready_controller(&server, true).await;

    let token = TestTokenBuilder::new()
        .issuer(TEST_ISSUER_OTHER)
        .audience(TEST_AUDIENCE)
        .sign(&key);

    assert_eq!(
        controller.verify(TEST_ROUTE, &bearer(&token)),
        Some(VerificationOutcome::Rejected(
            RejectReason::NoMatchingProvider
        ))
    );

    controller.shutdown();
}

#[tokio::test]
async fn test_time_and_audience_rejections() {
    let key = test_signing_key(1).unwrap();
    let server = MockJwksServer::start(&[&key]).await;
    let controller = ready_controller(&server, true).await;

    let base = TestTokenBuilder::new()
        .issuer(TEST_ISSUER)
        .audience(TEST_AUDIENCE);

    let cases = [
        (base.clone().expires_in(-3600), RejectReason::Expired),
        (base.clone().not_before_in(3600), RejectReason::NotYetValid),
        (
            base.clone().issued_at(chrono::Utc::now().timestamp() + 3600),
            RejectReason::IssuedInFuture,
        ),
        (
            base.clone().audience(TEST_AUDIENCE_OTHER),
            RejectReason::AudienceMismatch,
        ),
        (
            base.clone().claim("exp", json!("tomorrow")),
            RejectReason::MalformedCredential,
        ),
    ];

    for (builder, expected) in cases {
        let token = builder.sign(&key);
        assert_eq!(
            controller.verify(TEST_ROUTE, &bearer(&token)),
            Some(VerificationOutcome::Rejected(expected)),
            "expected {expected:?}"
        );
    }

    controller.shutdown();
}

#[tokio::test]
async fn test_extreme_time_claims_do_not_overflow() {
    let key = test_signing_key(1).unwrap();
    let server = MockJwksServer::start(&[&key]).await;
    let controller = ready_controller(&server, true).await;

    let base = TestTokenBuilder::new()
        .issuer(TEST_ISSUER)
        .audience(TEST_AUDIENCE);

    let accepted = [
        base.clone().claim("exp", json!(i64::MAX)),
        base.clone().claim("exp", json!(1e300)),
        base.clone().claim("nbf", json!(i64::MIN)),
        base.clone().claim("iat", json!(i64::MIN)),
    ];
    for builder in accepted {
        let token = builder.sign(&key);
        let outcome = controller.verify(TEST_ROUTE, &bearer(&token)).unwrap();
        assert!(outcome.is_allowed(), "got {outcome:?}");
    }

    let expired = base.clone().claim("exp", json!(i64::MIN)).sign(&key);
    assert_eq!(
        controller.verify(TEST_ROUTE, &bearer(&expired)),
        Some(VerificationOutcome::Rejected(RejectReason::Expired))
    );

    let not_yet_valid = base.claim("nbf", json!(i64::MAX)).sign(&key);
    assert_eq!(
        controller.verify(TEST_ROUTE, &bearer(&not_yet_valid)),
        Some(VerificationOutcome::Rejected(RejectReason::NotYetValid))
    );

    controller.shutdown();
}

#[tokio::test]
async fn test_malformed_and_unsupported_tokens() {
    let key = test_signing_key(1).unwrap();
    let server = MockJwksServer::start(&[&key]).await;
    let controller = ready_controller(&server, true).await;

    assert_eq!(
        controller.verify(TEST_ROUTE, &bearer("not-a-jwt")),
        Some(VerificationOutcome::Rejected(
            RejectReason::MalformedCredential
        ))
    );

    let hs256 = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &json!({"iss": TEST_ISSUER, "exp": 9_999_999_999_i64}),
        &jsonwebtoken::EncodingKey::from_secret(b"shared-secret"),
    )
    .unwrap();
    assert_eq!(
        controller.verify(TEST_ROUTE, &bearer(&hs256)),
        Some(VerificationOutcome::Rejected(
            RejectReason::UnsupportedAlgorithm
        ))
    );

    controller.shutdown();
}

#[tokio::test]
async fn test_query_parameter_credential() {
    let key = test_signing_key(1).unwrap();
    let server = MockJwksServer::start(&[&key]).await;
    let controller = controller();
    apply(
        &controller,
        PolicyBuilder::new()
            .jwt_provider(
                TEST_PROVIDER,
                vec![example_provider(&server.jwks_uri())
                    .extract_from(json!({"params": ["access_token"]}))],
            )
            .route(TEST_ROUTE, &[TEST_PROVIDER], true),
    );
    wait_until_fresh(&controller).await;

    let token = TestTokenBuilder::new()
        .issuer(TEST_ISSUER)
        .audience(TEST_AUDIENCE)
        .sign(&key);

    let request = RequestCredentials::new().with_query(&format!("access_token={token}"));
    assert!(controller.verify(TEST_ROUTE, &request).unwrap().is_allowed());

    // The default Authorization header is no longer consulted
    assert_eq!(
        controller.verify(TEST_ROUTE, &bearer(&token)),
        Some(VerificationOutcome::Rejected(
            RejectReason::MissingCredential
        ))
    );

    controller.shutdown();
}

#[tokio::test]
async fn test_second_provider_accepts_when_first_does_not() {
    let first_key = test_signing_key(1).unwrap();
    let second_key = test_signing_key(2).unwrap();
    let first = MockJwksServer::start(&[&first_key]).await;
    let second = MockJwksServer::start(&[&second_key]).await;

    let controller = controller();
    apply(
        &controller,
        PolicyBuilder::new()
            .jwt_provider(TEST_PROVIDER, vec![example_provider(&first.jwks_uri())])
            .jwt_provider(
                "partner",
                vec![JwtProviderBuilder::new("main", &second.jwks_uri())],
            )
            .route(TEST_ROUTE, &[TEST_PROVIDER, "partner"], true),
    );
    wait_until_fresh(&controller).await;

    let token = TestTokenBuilder::new()
        .issuer(TEST_ISSUER_OTHER)
        .sign(&second_key);

    match controller.verify(TEST_ROUTE, &bearer(&token)).unwrap() {
        VerificationOutcome::Authenticated { provider, .. } => assert_eq!(provider, "partner"),
        other => panic!("expected Authenticated, got {other:?}"),
    }

    controller.shutdown();
}

/// Serves one fixed key set for one URI; anything else is unreachable.
struct StaticFetcher {
    uri: &'static str,
    body: Vec<u8>,
}

#[async_trait]
impl JwksFetcher for StaticFetcher {
    async fn fetch(&self, uri: &str, _timeout: Duration) -> Result<KeySet, FetchError> {
        if uri == self.uri {
            KeySet::from_json(&self.body)
        } else {
            Err(FetchError::ConnectionError(format!("no route to {uri}")))
        }
    }
}

#[tokio::test]
async fn test_example_provider_scenario() {
    let key = test_signing_key(3).unwrap();
    let keys = KeyCache::new(Arc::new(StaticFetcher {
        uri: "https://foo.com/jwks.json",
        body: serde_json::to_vec(&jwks_json(&[&key])).unwrap(),
    }));
    let verifier = RequestVerifier::new(keys.clone(), Duration::from_secs(60));
    let controller = AuthnController::new(ProviderRegistry::default(), keys, verifier);

    let token = TestTokenBuilder::new()
        .issuer("https://www.example.com")
        .for_subject("user-1")
        .sign(&key);

    apply(
        &controller,
        PolicyBuilder::new()
            .jwt_provider(
                "example",
                vec![JwtProviderBuilder::new("main", "https://foo.com/jwks.json")
                    .issuer("https://www.example.com")],
            )
            .route("/", &["example"], true),
    );

    wait_until_fresh(&controller).await;

    match controller.verify("/", &bearer(&token)).unwrap() {
        VerificationOutcome::Authenticated { provider, claims, .. } => {
            assert_eq!(provider, "example");
            assert_eq!(claims.issuer(), Some("https://www.example.com"));
            assert_eq!(claims.subject(), Some("user-1"));
        }
        other => panic!("expected Authenticated, got {other:?}"),
    }

    controller.shutdown();
}
