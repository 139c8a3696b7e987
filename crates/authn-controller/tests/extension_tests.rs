//! Provider types registered from outside the crate.
//!
//! A static API key type is registered next to the built-in `JWT` type and
//! used through the full apply, compile and verify path.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use authn_controller::compiler::{CompileErrorKind, PlanBinding, UpstreamSet};
use authn_controller::controller::{AuthnController, ConfigSnapshot};
use authn_controller::keys::{CacheState, HttpJwksFetcher, KeyCache};
use authn_controller::providers::{
    BindingError, ProviderConfig, ProviderRegistry, ProviderTypeHandler, ResolvedProvider,
    ValidationError, ValidationErrorKind,
};
use authn_controller::verifier::{
    BindingCheck, BindingVerdict, CheckContext, Claims, RejectReason, RequestCredentials,
    RequestVerifier, VerificationOutcome,
};
use authn_test_utils::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

const API_KEY_TYPE: &str = "APIKey";
const API_KEY_PROVIDER: &str = "partners";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ApiKeyConfig {
    name: String,
    header: String,
    key: String,
}

struct ApiKeyHandler;

impl ProviderTypeHandler for ApiKeyHandler {
    fn type_tag(&self) -> &'static str {
        API_KEY_TYPE
    }

    fn payload_field(&self) -> &'static str {
        "apiKeys"
    }

    fn validate(
        &self,
        provider: &str,
        payload: &Value,
    ) -> Result<ProviderConfig, Vec<ValidationError>> {
        let keys: Vec<ApiKeyConfig> = serde_json::from_value(payload.clone()).map_err(|e| {
            vec![ValidationError::new(
                ValidationErrorKind::InvalidPayload,
                provider,
                e.to_string(),
            )]
        })?;

        let errors: Vec<_> = keys
            .iter()
            .filter(|k| k.key.is_empty())
            .map(|k| {
                ValidationError::new(
                    ValidationErrorKind::InvalidPayload,
                    provider,
                    "key must not be empty",
                )
                .in_sub_provider(&k.name)
            })
            .collect();

        if errors.is_empty() {
            Ok(Arc::new(keys))
        } else {
            Err(errors)
        }
    }

    fn compile(
        &self,
        provider: &ResolvedProvider,
        selector: Option<&str>,
        _upstreams: &mut UpstreamSet,
    ) -> Result<Vec<PlanBinding>, BindingError> {
        let keys = provider
            .config::<Vec<ApiKeyConfig>>()
            .ok_or_else(|| BindingError::Unusable("not an API key provider".to_string()))?;

        let bindings: Vec<_> = keys
            .iter()
            .filter(|k| selector.map_or(true, |s| s == k.name))
            .map(|k| {
                PlanBinding::new(ApiKeyBinding {
                    parent: provider.name.clone(),
                    name: k.name.clone(),
                    header: k.header.clone(),
                    key: k.key.clone(),
                })
            })
            .collect();

        match selector {
            Some(sub) if bindings.is_empty() => Err(BindingError::UnknownSubProvider(sub.to_string())),
            _ => Ok(bindings),
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiKeyBinding {
    parent: String,
    name: String,
    header: String,
    #[serde(skip)]
    key: String,
}

impl BindingCheck for ApiKeyBinding {
    fn type_tag(&self) -> &'static str {
        API_KEY_TYPE
    }

    fn qualified_name(&self) -> String {
        format!("{}/{}", self.parent, self.name)
    }

    fn extract<'r>(&self, request: &'r RequestCredentials) -> Option<&'r str> {
        request.header(&self.header)
    }

    fn check(&self, credential: &str, _ctx: &CheckContext<'_>) -> BindingVerdict {
        if credential == self.key {
            BindingVerdict::Decided(VerificationOutcome::Authenticated {
                provider: self.parent.clone(),
                claims: Claims::default(),
                headers: vec![("x-api-key-name".to_string(), self.name.clone())],
            })
        } else {
            BindingVerdict::NoMatch
        }
    }

    fn describe(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::default();
    registry.register(Arc::new(ApiKeyHandler));
    registry
}

fn controller(registry: ProviderRegistry) -> AuthnController {
    let keys = KeyCache::new(Arc::new(HttpJwksFetcher::new()));
    let verifier = RequestVerifier::new(keys.clone(), Duration::from_secs(60));
    AuthnController::new(registry, keys, verifier)
}

fn api_key_provider(keys: Value) -> Value {
    json!({"name": API_KEY_PROVIDER, "type": API_KEY_TYPE, "apiKeys": keys})
}

fn gold_and_silver() -> Value {
    api_key_provider(json!([
        {"name": "gold", "header": "x-api-key", "key": "gold-secret"},
        {"name": "silver", "header": "x-api-key", "key": "silver-secret"},
    ]))
}

fn api_key(value: &str) -> RequestCredentials {
    RequestCredentials::new().with_header("X-Api-Key", value)
}

fn authenticated_by(outcome: Option<VerificationOutcome>) -> (String, Vec<(String, String)>) {
    match outcome {
        Some(VerificationOutcome::Authenticated {
            provider, headers, ..
        }) => (provider, headers),
        other => panic!("expected Authenticated, got {other:?}"),
    }
}

#[test]
fn test_registered_type_is_listed() {
    assert_eq!(registry().type_tags().collect::<Vec<_>>(), vec!["APIKey", "JWT"]);
}

#[test]
fn test_unregistered_type_is_unsupported() {
    let controller = controller(ProviderRegistry::default());
    let snapshot = ConfigSnapshot::from_json(
        &PolicyBuilder::new()
            .raw_provider(gold_and_silver())
            .route(TEST_ROUTE, &[API_KEY_PROVIDER], true)
            .to_bytes(),
    )
    .unwrap();

    let report = controller.apply(&snapshot);

    assert_eq!(report.validation_errors.len(), 1);
    assert_eq!(
        report.validation_errors[0].kind,
        ValidationErrorKind::UnsupportedType
    );
    assert_eq!(report.compile_errors[0].kind, CompileErrorKind::ProviderInvalid);
    assert!(controller.plan(TEST_ROUTE).is_none());
}

#[tokio::test]
async fn test_route_bound_to_registered_type() {
    let controller = controller(registry());
    let snapshot = ConfigSnapshot::from_json(
        &PolicyBuilder::new()
            .raw_provider(gold_and_silver())
            .route(TEST_ROUTE, &[API_KEY_PROVIDER], true)
            .route("/gold", &["partners/gold"], true)
            .to_bytes(),
    )
    .unwrap();

    let report = controller.apply(&snapshot);
    assert!(report.is_clean(), "unexpected errors: {report:?}");
    assert_eq!(report.routes_enforced, 2);
    assert!(report.endpoints_added.is_empty());

    let (provider, headers) = authenticated_by(controller.verify(TEST_ROUTE, &api_key("silver-secret")));
    assert_eq!(provider, API_KEY_PROVIDER);
    assert_eq!(headers, vec![("x-api-key-name".to_string(), "silver".to_string())]);

    assert_eq!(
        controller.verify(TEST_ROUTE, &api_key("guess")),
        Some(VerificationOutcome::Rejected(RejectReason::NoMatchingProvider))
    );
    assert_eq!(
        controller.verify(TEST_ROUTE, &RequestCredentials::new()),
        Some(VerificationOutcome::Rejected(RejectReason::MissingCredential))
    );

    // The sub-provider selector narrows the route to one key.
    assert_eq!(
        controller.verify("/gold", &api_key("silver-secret")),
        Some(VerificationOutcome::Rejected(RejectReason::NoMatchingProvider))
    );
    let (_, headers) = authenticated_by(controller.verify("/gold", &api_key("gold-secret")));
    assert_eq!(headers[0].1, "gold");

    let plan = serde_json::to_value(controller.plan("/gold").unwrap().as_ref()).unwrap();
    assert_eq!(
        plan["bindings"],
        json!([{"type": "APIKey", "parent": "partners", "name": "gold", "header": "x-api-key"}])
    );

    let status = controller.status();
    assert!(status.providers.iter().any(|p| p.name == API_KEY_PROVIDER && p.accepted));

    controller.shutdown();
}

#[tokio::test]
async fn test_registered_type_errors_surface_like_builtin_ones() {
    let controller = controller(registry());
    let snapshot = ConfigSnapshot::from_json(
        &PolicyBuilder::new()
            .raw_provider(api_key_provider(json!([
                {"name": "gold", "header": "x-api-key", "key": ""},
            ])))
            .raw_provider(json!({
                "name": "valid",
                "type": API_KEY_TYPE,
                "apiKeys": [{"name": "main", "header": "x-api-key", "key": "k"}],
            }))
            .raw_provider(json!({
                "name": "crossed",
                "type": API_KEY_TYPE,
                "apiKeys": [{"name": "main", "header": "x-api-key", "key": "k"}],
                "jwtProviders": [{"name": "main"}],
            }))
            .route("/empty", &[API_KEY_PROVIDER], true)
            .route("/missing", &["valid/other"], true)
            .route("/crossed", &["crossed"], true)
            .to_bytes(),
    )
    .unwrap();

    let report = controller.apply(&snapshot);

    let kinds: Vec<_> = report.validation_errors.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&ValidationErrorKind::InvalidPayload));
    assert!(kinds.contains(&ValidationErrorKind::UnionMismatch));
    let empty_key = report
        .validation_errors
        .iter()
        .find(|e| e.provider == API_KEY_PROVIDER)
        .unwrap();
    assert_eq!(empty_key.sub_provider.as_deref(), Some("gold"));

    let missing = report
        .compile_errors
        .iter()
        .find(|e| e.route == "/missing")
        .unwrap();
    assert_eq!(missing.kind, CompileErrorKind::ReferenceNotFound);
    assert!(missing.message.contains("has no APIKey provider 'other'"), "{}", missing.message);
    assert_eq!(report.routes_enforced, 0);

    controller.shutdown();
}

#[tokio::test]
async fn test_route_mixing_jwt_and_registered_type() {
    let key = test_signing_key(1).unwrap();
    let server = MockJwksServer::start(&[&key]).await;
    let controller = controller(registry());

    let snapshot = ConfigSnapshot::from_json(
        &PolicyBuilder::new()
            .jwt_provider(
                TEST_PROVIDER,
                vec![JwtProviderBuilder::new(TEST_JWT_PROVIDER, &server.jwks_uri()).issuer(TEST_ISSUER)],
            )
            .raw_provider(gold_and_silver())
            .route(TEST_ROUTE, &[TEST_PROVIDER, API_KEY_PROVIDER], true)
            .to_bytes(),
    )
    .unwrap();
    let report = controller.apply(&snapshot);
    assert!(report.is_clean(), "unexpected errors: {report:?}");
    assert_eq!(report.endpoints_added.len(), 1);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !controller
        .key_cache()
        .statuses()
        .iter()
        .all(|s| s.state == CacheState::Fresh)
    {
        assert!(tokio::time::Instant::now() < deadline, "key cache never became fresh");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let token = TestTokenBuilder::new()
        .issuer(TEST_ISSUER)
        .for_subject("alice")
        .sign(&key);
    let bearer =
        RequestCredentials::new().with_header("Authorization", format!("Bearer {token}"));
    let (provider, _) = authenticated_by(controller.verify(TEST_ROUTE, &bearer));
    assert_eq!(provider, TEST_PROVIDER);

    // No bearer token: the API key is the first credential found.
    let (provider, _) = authenticated_by(controller.verify(TEST_ROUTE, &api_key("gold-secret")));
    assert_eq!(provider, API_KEY_PROVIDER);

    let plan = controller.plan(TEST_ROUTE).unwrap();
    let tags: Vec<_> = plan.bindings.iter().map(PlanBinding::type_tag).collect();
    assert_eq!(tags, vec!["JWT", "APIKey", "APIKey"]);
    assert!(plan.bindings[1].downcast_ref::<ApiKeyBinding>().is_some());

    controller.shutdown();
}
