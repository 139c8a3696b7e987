//! Request Verifier.
//!
//! Runs a [`VerificationPlan`] against one request. Only Key Cache snapshots
//! are consulted, so verification never waits on the network.
//!
//! Each binding in a plan carries a [`BindingCheck`] supplied by its
//! provider type; this module only runs the decision procedure over them.
//!
//! # Decision procedure
//!
//! 1. Take the first credential found by the bindings' extractors, in
//!    binding order. None: `Unauthenticated`, or `Rejected(MissingCredential)`
//!    when the route requires a credential.
//! 2. Ask every binding that reads the same credential, in order:
//!    - `NotApplicable`: the binding's constraints (e.g. issuer) do not
//!      cover the credential; not counted as an attempt
//!    - `Unverifiable`: the binding has no keys yet
//!    - `NoMatch`: tried and failed; later bindings may still succeed
//!    - `Decided`: final, no fall-through
//! 3. Otherwise `Unverifiable` if every attempted binding lacked keys,
//!    else `Rejected(NoMatchingProvider)`.

pub mod claims;
pub mod extract;
pub mod jwt;

pub use claims::Claims;
pub use extract::{extract_credential, RequestCredentials};

use crate::compiler::VerificationPlan;
use crate::keys::KeyCache;
use crate::observability::metrics;
use axum::http::StatusCode;
use common::jwt::MAX_CLOCK_SKEW;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::time::Duration;

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RejectReason {
    MissingCredential,
    MalformedCredential,
    UnsupportedAlgorithm,
    NoMatchingProvider,
    Expired,
    NotYetValid,
    IssuedInFuture,
    AudienceMismatch,
}

impl RejectReason {
    /// Stable snake_case label for metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::MissingCredential => "missing_credential",
            RejectReason::MalformedCredential => "malformed_credential",
            RejectReason::UnsupportedAlgorithm => "unsupported_algorithm",
            RejectReason::NoMatchingProvider => "no_matching_provider",
            RejectReason::Expired => "expired",
            RejectReason::NotYetValid => "not_yet_valid",
            RejectReason::IssuedInFuture => "issued_in_future",
            RejectReason::AudienceMismatch => "audience_mismatch",
        }
    }
}

/// Result of verifying one request.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    /// No credential and none required; passed through without identity.
    Unauthenticated,
    /// A provider verified the credential.
    Authenticated {
        /// Parent provider name.
        provider: String,
        claims: Claims,
        /// `claimToHeaders` output, in declared order.
        headers: Vec<(String, String)>,
    },
    Rejected(RejectReason),
    /// Every matching provider is still waiting for its first key set.
    Unverifiable,
}

impl VerificationOutcome {
    /// Lowercase label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            VerificationOutcome::Unauthenticated => "unauthenticated",
            VerificationOutcome::Authenticated { .. } => "authenticated",
            VerificationOutcome::Rejected(_) => "rejected",
            VerificationOutcome::Unverifiable => "unverifiable",
        }
    }

    /// Whether the request may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(
            self,
            VerificationOutcome::Unauthenticated | VerificationOutcome::Authenticated { .. }
        )
    }

    /// Response status for a denied request; `None` passes through.
    #[must_use]
    pub fn http_status(&self) -> Option<StatusCode> {
        if self.is_allowed() {
            None
        } else {
            Some(StatusCode::UNAUTHORIZED)
        }
    }
}

/// What one binding made of a credential.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingVerdict {
    NotApplicable,
    Unverifiable,
    NoMatch,
    Decided(VerificationOutcome),
}

/// Shared inputs for every [`BindingCheck`] during one verification.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub keys: &'a KeyCache,
    pub clock_skew: Duration,
    /// Unix seconds.
    pub now: i64,
}

/// Verification logic for one plan binding, supplied by the provider type
/// that compiled it.
///
/// Checks run on the request path and must not block.
pub trait BindingCheck: fmt::Debug + Send + Sync {
    /// Type tag of the provider type that produced this binding.
    fn type_tag(&self) -> &'static str;

    /// `parent/name`; unique within a route.
    fn qualified_name(&self) -> String;

    /// The credential this binding reads from `request`, if present.
    fn extract<'r>(&self, request: &'r RequestCredentials) -> Option<&'r str>;

    /// Judge `credential`.
    fn check(&self, credential: &str, ctx: &CheckContext<'_>) -> BindingVerdict;

    /// Published form of the binding, as a JSON object.
    fn describe(&self) -> Value;

    fn as_any(&self) -> &dyn Any;
}

/// Executes verification plans against Key Cache snapshots.
#[derive(Debug, Clone)]
pub struct RequestVerifier {
    keys: KeyCache,
    clock_skew: Duration,
}

impl RequestVerifier {
    /// Create a verifier. `clock_skew` is capped at `MAX_CLOCK_SKEW`.
    pub fn new(keys: KeyCache, clock_skew: Duration) -> Self {
        Self {
            keys,
            clock_skew: clock_skew.min(MAX_CLOCK_SKEW),
        }
    }

    /// Clock skew applied to `exp`, `nbf` and `iat`.
    #[must_use]
    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    /// Verify a request against `plan` at the current time.
    #[must_use]
    pub fn verify(
        &self,
        plan: &VerificationPlan,
        request: &RequestCredentials,
    ) -> VerificationOutcome {
        self.verify_at(plan, request, chrono::Utc::now().timestamp())
    }

    /// Verify a request against `plan` at `now` (Unix seconds).
    #[must_use]
    pub fn verify_at(
        &self,
        plan: &VerificationPlan,
        request: &RequestCredentials,
        now: i64,
    ) -> VerificationOutcome {
        let outcome = self.evaluate(plan, request, now);

        let reason = match &outcome {
            VerificationOutcome::Rejected(reason) => reason.as_str(),
            _ => "none",
        };
        metrics::record_verification(outcome.label(), reason);
        tracing::debug!(
            target: "authn.verifier",
            route = %plan.route,
            outcome = outcome.label(),
            reason,
            "Request verified"
        );

        outcome
    }

    fn evaluate(
        &self,
        plan: &VerificationPlan,
        request: &RequestCredentials,
        now: i64,
    ) -> VerificationOutcome {
        let Some(credential) = plan
            .bindings
            .iter()
            .find_map(|b| b.check().extract(request))
        else {
            return if plan.require_credential {
                VerificationOutcome::Rejected(RejectReason::MissingCredential)
            } else {
                VerificationOutcome::Unauthenticated
            };
        };

        let ctx = CheckContext {
            keys: &self.keys,
            clock_skew: self.clock_skew,
            now,
        };
        let mut attempts = 0usize;
        let mut unverifiable = 0usize;

        for binding in &plan.bindings {
            let check = binding.check();
            if check.extract(request) != Some(credential) {
                continue;
            }
            match check.check(credential, &ctx) {
                BindingVerdict::NotApplicable => {}
                BindingVerdict::Unverifiable => {
                    attempts += 1;
                    unverifiable += 1;
                }
                BindingVerdict::NoMatch => attempts += 1,
                BindingVerdict::Decided(outcome) => {
                    tracing::debug!(
                        target: "authn.verifier",
                        binding = %binding.qualified_name(),
                        outcome = outcome.label(),
                        "Binding decided"
                    );
                    return outcome;
                }
            }
        }

        if attempts > 0 && unverifiable == attempts {
            VerificationOutcome::Unverifiable
        } else {
            VerificationOutcome::Rejected(RejectReason::NoMatchingProvider)
        }
    }
}
