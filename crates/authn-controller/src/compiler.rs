//! Policy Compiler.
//!
//! Turns route bindings plus validated providers into one
//! [`VerificationPlan`] per route and one [`UpstreamDescriptor`] per distinct
//! JWKS URI. Compilation is deterministic: routes are keyed in a `BTreeMap`
//! and upstreams keep first-seen order, so the serialized output of two runs
//! over the same input is byte-identical.
//!
//! A route with any error produces no plan (it is not enforced) and the
//! error is reported; other routes are unaffected.
//!
//! The compiler never looks inside a binding: each provider type's handler
//! produces [`PlanBinding`]s that carry their own [`BindingCheck`].

use crate::keys::RemoteJwks;
use crate::providers::{BindingError, ValidatedProviders};
use crate::verifier::BindingCheck;
use common::types::EndpointId;
use ring::digest::{digest, SHA256};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Input
// =============================================================================

/// Which providers guard a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteBinding {
    pub route: String,

    /// `"<provider>"` binds every sub-provider; `"<provider>/<sub>"` binds one.
    #[serde(default)]
    pub providers: Vec<String>,

    /// Reject requests that carry no credential instead of passing them
    /// through unauthenticated.
    #[serde(default)]
    pub require_credential: bool,
}

// =============================================================================
// Output
// =============================================================================

/// Connection details for one JWKS host, for the data plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamDescriptor {
    pub cluster: EndpointId,
    pub uri: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Fetch settings handed to the Key Cache.
    #[serde(skip)]
    pub source: RemoteJwks,
}

/// One way a request may authenticate on a route.
///
/// Serializes as the check's description with a `type` field added.
#[derive(Clone)]
pub struct PlanBinding(Arc<dyn BindingCheck>);

impl PlanBinding {
    pub fn new(check: impl BindingCheck + 'static) -> Self {
        Self(Arc::new(check))
    }

    /// Type tag of the provider that produced this binding.
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        self.0.type_tag()
    }

    /// `parent/provider`, as used in logs and outcomes.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        self.0.qualified_name()
    }

    /// The verification logic behind this binding.
    #[must_use]
    pub fn check(&self) -> &dyn BindingCheck {
        self.0.as_ref()
    }

    /// The concrete binding, if it is a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for PlanBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.0.as_ref(), f)
    }
}

impl PartialEq for PlanBinding {
    fn eq(&self, other: &Self) -> bool {
        self.type_tag() == other.type_tag() && self.0.describe() == other.0.describe()
    }
}

impl Eq for PlanBinding {}

impl Serialize for PlanBinding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.describe() {
            Value::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len() + 1))?;
                map.serialize_entry("type", self.type_tag())?;
                for (key, value) in fields.iter().filter(|(key, _)| key.as_str() != "type") {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            other => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", self.type_tag())?;
                map.serialize_entry("config", &other)?;
                map.end()
            }
        }
    }
}

/// Immutable decision procedure for one route. Bindings are tried in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationPlan {
    pub route: String,
    pub require_credential: bool,
    pub bindings: Vec<PlanBinding>,
}

/// Everything the data plane needs, published as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompiledPolicy {
    pub plans: BTreeMap<String, Arc<VerificationPlan>>,
    pub upstreams: Vec<UpstreamDescriptor>,
}

impl CompiledPolicy {
    /// Plan for a route, if the route compiled.
    #[must_use]
    pub fn plan(&self, route: &str) -> Option<Arc<VerificationPlan>> {
        self.plans.get(route).cloned()
    }

    /// Endpoints referenced by this policy.
    pub fn endpoints(&self) -> impl Iterator<Item = &EndpointId> {
        self.upstreams.iter().map(|u| &u.cluster)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Category of a route compilation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum CompileErrorKind {
    InvalidRoute,
    InvalidReference,
    ReferenceNotFound,
    ProviderInvalid,
    DuplicateBinding,
    EmptyBinding,
    DuplicateRoute,
}

impl CompileErrorKind {
    /// Stable snake_case label for metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CompileErrorKind::InvalidRoute => "invalid_route",
            CompileErrorKind::InvalidReference => "invalid_reference",
            CompileErrorKind::ReferenceNotFound => "reference_not_found",
            CompileErrorKind::ProviderInvalid => "provider_invalid",
            CompileErrorKind::DuplicateBinding => "duplicate_binding",
            CompileErrorKind::EmptyBinding => "empty_binding",
            CompileErrorKind::DuplicateRoute => "duplicate_route",
        }
    }
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One problem found while compiling a route.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("route '{route}': {message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub route: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub message: String,
}

impl CompileError {
    fn new(kind: CompileErrorKind, route: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            route: route.to_string(),
            reference: None,
            message: message.into(),
        }
    }

    fn at(mut self, reference: &str) -> Self {
        self.reference = Some(reference.to_string());
        self
    }
}

/// Result of a non-strict compile: whatever compiled, plus every error.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    pub policy: CompiledPolicy,
    pub errors: Vec<CompileError>,
}

// =============================================================================
// Upstreams
// =============================================================================

/// Upstream descriptors keyed by URI, in first-seen order.
#[derive(Debug, Default)]
pub struct UpstreamSet {
    descriptors: Vec<UpstreamDescriptor>,
    by_uri: HashMap<String, usize>,
}

impl UpstreamSet {
    /// Register a JWKS source and return its cluster id.
    ///
    /// A URI already registered keeps its first descriptor; identical URIs
    /// always share one endpoint.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUri` if the URI has no host or a non-http(s) scheme.
    pub fn register(&mut self, remote: &RemoteJwks) -> Result<EndpointId, BindingError> {
        if let Some(descriptor) = self
            .by_uri
            .get(&remote.uri)
            .and_then(|&idx| self.descriptors.get(idx))
        {
            return Ok(descriptor.cluster.clone());
        }

        let invalid = || BindingError::InvalidUri(remote.uri.clone());
        let parsed = url::Url::parse(&remote.uri).map_err(|_| invalid())?;
        let tls = match parsed.scheme() {
            "https" => true,
            "http" => false,
            _ => return Err(invalid()),
        };
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(invalid)?
            .to_string();
        let port = parsed.port_or_known_default().ok_or_else(invalid)?;

        let cluster = cluster_id(&host, port, &remote.uri);
        self.by_uri
            .insert(remote.uri.clone(), self.descriptors.len());
        self.descriptors.push(UpstreamDescriptor {
            cluster: cluster.clone(),
            uri: remote.uri.clone(),
            host,
            port,
            tls,
            connect_timeout: remote.timeout,
            source: remote.clone(),
        });
        Ok(cluster)
    }

    /// Number of distinct upstreams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether nothing was registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Forget everything registered after the first `len` upstreams.
    fn truncate(&mut self, len: usize) {
        for removed in self.descriptors.drain(len.min(self.descriptors.len())..) {
            self.by_uri.remove(&removed.uri);
        }
    }

    fn into_descriptors(self) -> Vec<UpstreamDescriptor> {
        self.descriptors
    }
}

/// Stable cluster id: `jwks_<host>_<port>_<first 8 hex of SHA-256(uri)>`,
/// with every non-alphanumeric host character mapped to `_`.
#[must_use]
pub fn cluster_id(host: &str, port: u16, uri: &str) -> EndpointId {
    let host: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let hash = hex::encode(digest(&SHA256, uri.as_bytes()));
    let prefix = hash.get(..8).unwrap_or(&hash);
    EndpointId::new(format!("jwks_{host}_{port}_{prefix}"))
}

// =============================================================================
// Compilation
// =============================================================================

/// Compile every route, keeping the ones that compile.
#[must_use]
pub fn compile(validated: &ValidatedProviders, routes: &[RouteBinding]) -> CompileOutput {
    let mut route_counts: HashMap<&str, usize> = HashMap::new();
    for binding in routes {
        *route_counts.entry(binding.route.as_str()).or_default() += 1;
    }

    let mut plans = BTreeMap::new();
    let mut upstreams = UpstreamSet::default();
    let mut errors = Vec::new();
    let mut duplicate_reported = BTreeSet::new();

    for binding in routes {
        let route = binding.route.as_str();

        if route.is_empty() {
            errors.push(CompileError::new(
                CompileErrorKind::InvalidRoute,
                route,
                "route name must not be empty",
            ));
            continue;
        }

        // No occurrence of a duplicated route is enforced.
        if route_counts.get(route).copied().unwrap_or(0) > 1 {
            if duplicate_reported.insert(route) {
                errors.push(CompileError::new(
                    CompileErrorKind::DuplicateRoute,
                    route,
                    "route is bound more than once",
                ));
            }
            continue;
        }

        // Upstreams are only kept for routes that compile.
        let checkpoint = upstreams.len();
        match compile_route(validated, binding, &mut upstreams) {
            Ok(plan) => {
                tracing::debug!(
                    target: "authn.compiler",
                    route = %route,
                    bindings = plan.bindings.len(),
                    "Route compiled"
                );
                plans.insert(route.to_string(), Arc::new(plan));
            }
            Err(route_errors) => {
                upstreams.truncate(checkpoint);
                tracing::debug!(
                    target: "authn.compiler",
                    route = %route,
                    error_count = route_errors.len(),
                    "Route not enforced"
                );
                errors.extend(route_errors);
            }
        }
    }

    CompileOutput {
        policy: CompiledPolicy {
            plans,
            upstreams: upstreams.into_descriptors(),
        },
        errors,
    }
}

/// Compile every route, failing if any route does not compile.
///
/// # Errors
///
/// Returns all compile errors.
pub fn compile_strict(
    validated: &ValidatedProviders,
    routes: &[RouteBinding],
) -> Result<CompiledPolicy, Vec<CompileError>> {
    let output = compile(validated, routes);
    if output.errors.is_empty() {
        Ok(output.policy)
    } else {
        Err(output.errors)
    }
}

fn compile_route(
    validated: &ValidatedProviders,
    binding: &RouteBinding,
    upstreams: &mut UpstreamSet,
) -> Result<VerificationPlan, Vec<CompileError>> {
    let route = binding.route.as_str();

    if binding.providers.is_empty() {
        return Err(vec![CompileError::new(
            CompileErrorKind::EmptyBinding,
            route,
            "route lists no providers",
        )]);
    }

    let mut errors = Vec::new();
    let mut bindings = Vec::new();
    let mut bound = BTreeSet::new();

    for reference in &binding.providers {
        let (provider_name, selector) = match parse_reference(reference) {
            Some(parts) => parts,
            None => {
                errors.push(
                    CompileError::new(
                        CompileErrorKind::InvalidReference,
                        route,
                        format!("'{reference}' is not '<provider>' or '<provider>/<name>'"),
                    )
                    .at(reference),
                );
                continue;
            }
        };

        let Some(provider) = validated.get(provider_name) else {
            let error = if validated.is_rejected(provider_name) {
                CompileError::new(
                    CompileErrorKind::ProviderInvalid,
                    route,
                    format!("provider '{provider_name}' failed validation"),
                )
            } else {
                CompileError::new(
                    CompileErrorKind::ReferenceNotFound,
                    route,
                    format!("provider '{provider_name}' not found"),
                )
            };
            errors.push(error.at(reference));
            continue;
        };

        match provider.compile(selector, upstreams) {
            Ok(resolved) => {
                for plan_binding in resolved {
                    let name = plan_binding.qualified_name();
                    if bound.insert(name.clone()) {
                        bindings.push(plan_binding);
                    } else {
                        errors.push(
                            CompileError::new(
                                CompileErrorKind::DuplicateBinding,
                                route,
                                format!("'{name}' is bound more than once"),
                            )
                            .at(reference),
                        );
                    }
                }
            }
            Err(BindingError::UnknownSubProvider(sub)) => errors.push(
                CompileError::new(
                    CompileErrorKind::ReferenceNotFound,
                    route,
                    format!(
                        "provider '{provider_name}' has no {} provider '{sub}'",
                        provider.type_tag()
                    ),
                )
                .at(reference),
            ),
            Err(BindingError::InvalidUri(uri)) => errors.push(
                CompileError::new(
                    CompileErrorKind::ProviderInvalid,
                    route,
                    format!("provider '{provider_name}' has unusable JWKS URI '{uri}'"),
                )
                .at(reference),
            ),
            Err(BindingError::Unusable(message)) => errors.push(
                CompileError::new(CompileErrorKind::ProviderInvalid, route, message)
                    .at(reference),
            ),
        }
    }

    if errors.is_empty() {
        Ok(VerificationPlan {
            route: route.to_string(),
            require_credential: binding.require_credential,
            bindings,
        })
    } else {
        Err(errors)
    }
}

/// Split `provider` or `provider/sub`. Anything else is malformed.
fn parse_reference(reference: &str) -> Option<(&str, Option<&str>)> {
    let mut parts = reference.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(provider), None, None) if !provider.is_empty() => Some((provider, None)),
        (Some(provider), Some(sub), None) if !provider.is_empty() && !sub.is_empty() => {
            Some((provider, Some(sub)))
        }
        _ => None,
    }
}
