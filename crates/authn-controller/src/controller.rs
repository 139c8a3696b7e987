//! Controller: applies configuration snapshots.
//!
//! Each `apply` validates providers, compiles routes, moves Key Cache
//! references over to the new upstreams and then publishes the new
//! [`CompiledPolicy`] in one step. Endpoints the new policy needs are
//! ensured before the old policy's endpoints are released, so an endpoint
//! used by both is never evicted in between.

use crate::compiler::{compile, CompileError, CompiledPolicy, RouteBinding, VerificationPlan};
use crate::keys::KeyCache;
use crate::observability::metrics;
use crate::providers::{AuthenticationProvider, ProviderRegistry, ValidationError};
use crate::status::{provider_statuses, route_statuses, StatusReport};
use crate::verifier::{RequestCredentials, RequestVerifier, VerificationOutcome};
use chrono::{DateTime, Utc};
use common::types::EndpointId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::instrument;

/// The full declarative input, re-read on every reload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub providers: Vec<AuthenticationProvider>,

    #[serde(default)]
    pub routes: Vec<RouteBinding>,
}

impl ConfigSnapshot {
    /// Parse a snapshot from JSON.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the document is not a snapshot.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Summary of one `apply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub generation: u64,
    pub routes_enforced: usize,
    pub validation_errors: Vec<ValidationError>,
    pub compile_errors: Vec<CompileError>,
    pub endpoints_added: Vec<EndpointId>,
    pub endpoints_removed: Vec<EndpointId>,
}

impl ApplyReport {
    /// Whether the snapshot applied without any error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.validation_errors.is_empty() && self.compile_errors.is_empty()
    }
}

#[derive(Debug, Default)]
struct Applied {
    generation: u64,
    applied_at: Option<DateTime<Utc>>,
    provider_names: Vec<String>,
    route_names: Vec<String>,
    validation_errors: Vec<ValidationError>,
    compile_errors: Vec<CompileError>,
}

/// Owns the current policy and the Key Cache references it holds.
pub struct AuthnController {
    registry: ProviderRegistry,
    keys: KeyCache,
    verifier: RequestVerifier,
    policy: watch::Sender<Arc<CompiledPolicy>>,
    // Held for the whole of `apply`, which also serializes applies.
    applied: Mutex<Applied>,
}

impl std::fmt::Debug for AuthnController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthnController")
            .field("registry", &self.registry)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl AuthnController {
    /// Create a controller with an empty policy.
    pub fn new(registry: ProviderRegistry, keys: KeyCache, verifier: RequestVerifier) -> Self {
        let (policy, _) = watch::channel(Arc::new(CompiledPolicy::default()));
        Self {
            registry,
            keys,
            verifier,
            policy,
            applied: Mutex::new(Applied::default()),
        }
    }

    /// Apply a configuration snapshot.
    ///
    /// Invalid providers and routes are reported, never fatal: everything
    /// that is valid takes effect.
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip_all, fields(providers = snapshot.providers.len(), routes = snapshot.routes.len()))]
    pub fn apply(&self, snapshot: &ConfigSnapshot) -> ApplyReport {
        let mut applied = self.applied.lock().unwrap_or_else(PoisonError::into_inner);

        let (validated, validation_errors) = self.registry.validate_partial(&snapshot.providers);
        let output = compile(&validated, &snapshot.routes);

        for error in &validation_errors {
            metrics::record_compile_error("validate", error.kind.as_str());
            tracing::warn!(
                target: "authn.controller",
                provider = %error.provider,
                sub_provider = error.sub_provider.as_deref().unwrap_or(""),
                kind = error.kind.as_str(),
                message = %error.message,
                "Provider rejected"
            );
        }
        for error in &output.errors {
            metrics::record_compile_error("compile", error.kind.as_str());
            tracing::warn!(
                target: "authn.controller",
                route = %error.route,
                kind = error.kind.as_str(),
                message = %error.message,
                "Route not enforced"
            );
        }

        let previous = self.policy.borrow().clone();
        let old: BTreeSet<EndpointId> = previous.endpoints().cloned().collect();
        let new: BTreeSet<EndpointId> = output.policy.endpoints().cloned().collect();

        for upstream in &output.policy.upstreams {
            self.keys.ensure(&upstream.cluster, &upstream.source);
        }
        for endpoint in &old {
            self.keys.release(endpoint);
        }

        let policy = Arc::new(output.policy);
        let routes_enforced = policy.plans.len();
        self.policy.send_replace(policy);

        applied.generation += 1;
        applied.applied_at = Some(Utc::now());
        applied.provider_names = snapshot.providers.iter().map(|p| p.name.clone()).collect();
        applied.route_names = snapshot.routes.iter().map(|r| r.route.clone()).collect();
        applied.validation_errors.clone_from(&validation_errors);
        applied.compile_errors.clone_from(&output.errors);

        let report = ApplyReport {
            generation: applied.generation,
            routes_enforced,
            validation_errors,
            compile_errors: output.errors,
            endpoints_added: new.difference(&old).cloned().collect(),
            endpoints_removed: old.difference(&new).cloned().collect(),
        };

        tracing::info!(
            target: "authn.controller",
            generation = report.generation,
            routes_enforced,
            validation_errors = report.validation_errors.len(),
            compile_errors = report.compile_errors.len(),
            endpoints_added = report.endpoints_added.len(),
            endpoints_removed = report.endpoints_removed.len(),
            "Policy applied"
        );

        report
    }

    /// The currently published policy.
    #[must_use]
    pub fn compiled(&self) -> Arc<CompiledPolicy> {
        self.policy.borrow().clone()
    }

    /// Notified on every publish.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<CompiledPolicy>> {
        self.policy.subscribe()
    }

    /// Plan for a route, if the route is enforced.
    #[must_use]
    pub fn plan(&self, route: &str) -> Option<Arc<VerificationPlan>> {
        self.policy.borrow().plan(route)
    }

    /// Verify a request for `route`. `None` means the route is not enforced.
    #[must_use]
    pub fn verify(&self, route: &str, request: &RequestCredentials) -> Option<VerificationOutcome> {
        let plan = self.plan(route)?;
        Some(self.verifier.verify(&plan, request))
    }

    /// The verifier used by [`verify`](Self::verify).
    #[must_use]
    pub fn verifier(&self) -> &RequestVerifier {
        &self.verifier
    }

    /// The Key Cache this controller drives.
    #[must_use]
    pub fn key_cache(&self) -> &KeyCache {
        &self.keys
    }

    /// Conditions for everything in the last applied snapshot.
    #[must_use]
    pub fn status(&self) -> StatusReport {
        let applied = self.applied.lock().unwrap_or_else(PoisonError::into_inner);
        let policy = self.compiled();

        StatusReport {
            generation: applied.generation,
            applied_at: applied.applied_at,
            providers: provider_statuses(
                applied.provider_names.iter().map(String::as_str),
                &applied.validation_errors,
            ),
            routes: route_statuses(
                applied.route_names.iter().map(String::as_str),
                &applied.compile_errors,
                &policy,
            ),
            endpoints: self.keys.statuses(),
        }
    }

    /// Stop all Key Cache refresh tasks.
    pub fn shutdown(&self) {
        self.keys.shutdown();
    }
}
