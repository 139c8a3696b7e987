//! Status reporting.
//!
//! Every declared provider and route gets an `Accepted` condition so
//! configuration problems surface as status instead of failures. Key Cache
//! state is reported per endpoint.

use crate::compiler::{CompileError, CompiledPolicy};
use crate::keys::EndpointStatus;
use crate::providers::ValidationError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Condition type used for providers and routes.
pub const CONDITION_ACCEPTED: &str = "Accepted";

/// One observation about an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: &'static str,
    pub status: bool,
    /// `Accepted` / `Enforced` when true, otherwise the error kind.
    pub reason: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_provider: Option<String>,
}

impl Condition {
    fn accepted(reason: &str, message: &str) -> Self {
        Self {
            condition_type: CONDITION_ACCEPTED,
            status: true,
            reason: reason.to_string(),
            message: message.to_string(),
            sub_provider: None,
        }
    }
}

impl From<&ValidationError> for Condition {
    fn from(error: &ValidationError) -> Self {
        Self {
            condition_type: CONDITION_ACCEPTED,
            status: false,
            reason: error.kind.to_string(),
            message: error.message.clone(),
            sub_provider: error.sub_provider.clone(),
        }
    }
}

impl From<&CompileError> for Condition {
    fn from(error: &CompileError) -> Self {
        Self {
            condition_type: CONDITION_ACCEPTED,
            status: false,
            reason: error.kind.to_string(),
            message: error.message.clone(),
            sub_provider: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub name: String,
    pub accepted: bool,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    pub route: String,
    /// Whether a plan was published for this route.
    pub enforced: bool,
    pub conditions: Vec<Condition>,
}

/// Everything `/v1/status` returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Number of snapshots applied so far.
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    pub providers: Vec<ProviderStatus>,
    pub routes: Vec<RouteStatus>,
    pub endpoints: Vec<EndpointStatus>,
}

/// Provider conditions, ordered by name. Duplicate declarations collapse
/// into one entry.
pub fn provider_statuses<'a>(
    declared: impl IntoIterator<Item = &'a str>,
    errors: &[ValidationError],
) -> Vec<ProviderStatus> {
    let mut by_name: BTreeMap<&str, Vec<Condition>> = declared
        .into_iter()
        .map(|name| (name, Vec::new()))
        .collect();
    for error in errors {
        by_name
            .entry(error.provider.as_str())
            .or_default()
            .push(Condition::from(error));
    }

    by_name
        .into_iter()
        .map(|(name, mut conditions)| {
            let accepted = conditions.is_empty();
            if accepted {
                conditions.push(Condition::accepted("Accepted", "provider is valid"));
            }
            ProviderStatus {
                name: name.to_string(),
                accepted,
                conditions,
            }
        })
        .collect()
}

/// Route conditions, ordered by route.
pub fn route_statuses<'a>(
    declared: impl IntoIterator<Item = &'a str>,
    errors: &[CompileError],
    policy: &CompiledPolicy,
) -> Vec<RouteStatus> {
    let mut by_route: BTreeMap<&str, Vec<Condition>> = declared
        .into_iter()
        .map(|route| (route, Vec::new()))
        .collect();
    for error in errors {
        by_route
            .entry(error.route.as_str())
            .or_default()
            .push(Condition::from(error));
    }

    by_route
        .into_iter()
        .map(|(route, mut conditions)| {
            let enforced = policy.plans.contains_key(route);
            if conditions.is_empty() {
                conditions.push(Condition::accepted("Enforced", "route plan is active"));
            }
            RouteStatus {
                route: route.to_string(),
                enforced,
                conditions,
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::compiler::CompileErrorKind;
    use crate::providers::ValidationErrorKind;

    #[test]
    fn test_provider_statuses() {
        let errors = vec![
            ValidationError::new(ValidationErrorKind::UnionMismatch, "bad", "empty jwtProviders"),
            ValidationError::new(ValidationErrorKind::InvalidIssuer, "bad", "issuer is empty")
                .in_sub_provider("main"),
        ];
        let statuses = provider_statuses(["good", "bad", "good"], &errors);

        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].name, "bad");
        assert!(!statuses[0].accepted);
        assert_eq!(statuses[0].conditions.len(), 2);
        assert_eq!(statuses[0].conditions[0].reason, "UnionMismatch");
        assert_eq!(statuses[0].conditions[1].sub_provider.as_deref(), Some("main"));

        assert_eq!(statuses[1].name, "good");
        assert!(statuses[1].accepted);
        assert!(statuses[1].conditions[0].status);
    }

    #[test]
    fn test_route_statuses() {
        let errors = vec![CompileError {
            kind: CompileErrorKind::ReferenceNotFound,
            route: "/b".to_string(),
            reference: Some("missing".to_string()),
            message: "provider 'missing' not found".to_string(),
        }];
        let statuses = route_statuses(["/b", "/a"], &errors, &CompiledPolicy::default());

        assert_eq!(statuses[0].route, "/a");
        assert_eq!(statuses[1].route, "/b");
        assert!(!statuses[1].enforced);
        assert_eq!(statuses[1].conditions[0].reason, "ReferenceNotFound");
        assert!(!statuses[1].conditions[0].status);
    }

    #[test]
    fn test_condition_serialization() {
        let condition = Condition::accepted("Accepted", "ok");
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["type"], "Accepted");
        assert_eq!(json["status"], true);
        assert!(json.get("subProvider").is_none());
    }
}
