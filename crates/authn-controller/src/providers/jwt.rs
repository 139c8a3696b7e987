//! `JWT` provider type.
//!
//! Payload field `jwtProviders`: a non-empty list of JWT sub-providers, each
//! with a remote JWKS source and optional issuer/audience constraints. Each
//! referenced sub-provider compiles to one [`JwtBinding`]; its verification
//! logic lives in `verifier::jwt`.

use crate::compiler::{PlanBinding, UpstreamSet};
use crate::keys::{
    RemoteJwks, RetryPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_FETCH_TIMEOUT,
    DEFAULT_NUM_RETRIES, DEFAULT_REFRESH_INTERVAL,
};
use crate::providers::{
    is_valid_label, BindingError, ProviderConfig, ProviderTypeHandler, ResolvedProvider,
    ValidationError, ValidationErrorKind,
};
use common::types::EndpointId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// `type` discriminator for JWT providers.
pub const JWT_TYPE_TAG: &str = "JWT";

/// Payload field carrying the sub-providers.
pub const JWT_PAYLOAD_FIELD: &str = "jwtProviders";

/// Header consulted when `extractFrom` is absent.
pub const DEFAULT_CREDENTIAL_HEADER: &str = "Authorization";

/// Prefix stripped from [`DEFAULT_CREDENTIAL_HEADER`].
pub const DEFAULT_CREDENTIAL_PREFIX: &str = "Bearer ";

// =============================================================================
// Shared shapes (input and plan)
// =============================================================================

/// Copy a verified claim into a request header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClaimToHeader {
    pub header: String,
    pub claim: String,
}

/// One header that may carry the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HeaderExtractor {
    pub name: String,

    /// Stripped from the value; a value without the prefix is ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_prefix: Option<String>,
}

/// Where to look for the credential, headers first then query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExtractFrom {
    #[serde(default)]
    pub headers: Vec<HeaderExtractor>,

    #[serde(default)]
    pub params: Vec<String>,
}

impl Default for ExtractFrom {
    /// `Authorization: Bearer <token>`.
    fn default() -> Self {
        Self {
            headers: vec![HeaderExtractor {
                name: DEFAULT_CREDENTIAL_HEADER.to_string(),
                value_prefix: Some(DEFAULT_CREDENTIAL_PREFIX.to_string()),
            }],
            params: Vec::new(),
        }
    }
}

/// One JWT sub-provider as bound to a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtBinding {
    pub parent: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    pub audiences: Vec<String>,
    pub endpoint: EndpointId,
    pub claim_to_headers: Vec<ClaimToHeader>,
    pub extract_from: ExtractFrom,
}

// =============================================================================
// Raw input
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct JwtProviderSpec {
    name: String,
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default)]
    audiences: Option<Vec<String>>,
    #[serde(default, rename = "remoteJWKS")]
    remote_jwks: Option<RemoteJwksSpec>,
    #[serde(default)]
    claim_to_headers: Option<Vec<ClaimToHeader>>,
    #[serde(default)]
    extract_from: Option<ExtractFrom>,
}

// Durations stay strings here so a bad value becomes a field-level
// InvalidDuration instead of a whole-document parse error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RemoteJwksSpec {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    timeout: Option<String>,
    #[serde(default)]
    refresh_interval: Option<String>,
    #[serde(default)]
    retry_policy: Option<RetryPolicySpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RetryPolicySpec {
    #[serde(default)]
    num_retries: Option<u32>,
    #[serde(default)]
    backoff: Option<BackoffSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct BackoffSpec {
    #[serde(default)]
    base_interval: Option<String>,
    #[serde(default)]
    max_interval: Option<String>,
}

// =============================================================================
// Validated config
// =============================================================================

/// A validated JWT sub-provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtProviderConfig {
    pub name: String,
    /// `None` means the issuer is not checked.
    pub issuer: Option<String>,
    /// Empty means the audience is not checked. De-duplicated, declared order.
    pub audiences: Vec<String>,
    pub remote_jwks: RemoteJwks,
    pub claim_to_headers: Vec<ClaimToHeader>,
    pub extract_from: ExtractFrom,
}

/// Handler for `type: JWT`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtProviderHandler;

impl ProviderTypeHandler for JwtProviderHandler {
    fn type_tag(&self) -> &'static str {
        JWT_TYPE_TAG
    }

    fn payload_field(&self) -> &'static str {
        JWT_PAYLOAD_FIELD
    }

    fn validate(
        &self,
        provider: &str,
        payload: &Value,
    ) -> Result<ProviderConfig, Vec<ValidationError>> {
        let Some(items) = payload.as_array() else {
            return Err(vec![ValidationError::new(
                ValidationErrorKind::InvalidPayload,
                provider,
                format!("'{JWT_PAYLOAD_FIELD}' must be a list"),
            )]);
        };

        let mut errors = Vec::new();
        let mut configs = Vec::with_capacity(items.len());
        let mut seen = HashSet::new();

        for item in items {
            let sub_name = item
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let spec: JwtProviderSpec = match serde_json::from_value(item.clone()) {
                Ok(spec) => spec,
                Err(e) => {
                    errors.push(
                        ValidationError::new(
                            ValidationErrorKind::InvalidPayload,
                            provider,
                            format!("invalid JWT provider: {e}"),
                        )
                        .in_sub_provider(sub_name),
                    );
                    continue;
                }
            };

            let mut sub_errors = Vec::new();

            if !is_valid_label(&spec.name) {
                sub_errors.push(ValidationErrorKind::InvalidName.with(
                    "JWT provider name must be a lowercase RFC 1123 label",
                ));
            } else if !seen.insert(spec.name.clone()) {
                sub_errors.push(
                    ValidationErrorKind::DuplicateName
                        .with("JWT provider name is declared more than once in this provider"),
                );
            }

            match validate_sub_provider(spec) {
                Ok(config) if sub_errors.is_empty() => configs.push(config),
                Ok(_) => {}
                Err(errs) => sub_errors.extend(errs),
            }

            errors.extend(sub_errors.into_iter().map(|(kind, message)| {
                ValidationError::new(kind, provider, message).in_sub_provider(sub_name.clone())
            }));
        }

        if errors.is_empty() {
            Ok(Arc::new(configs))
        } else {
            Err(errors)
        }
    }

    fn compile(
        &self,
        provider: &ResolvedProvider,
        selector: Option<&str>,
        upstreams: &mut UpstreamSet,
    ) -> Result<Vec<PlanBinding>, BindingError> {
        let subs = provider
            .config::<Vec<JwtProviderConfig>>()
            .ok_or_else(|| {
                BindingError::Unusable(format!(
                    "provider '{}' was not validated as {JWT_TYPE_TAG}",
                    provider.name
                ))
            })?;

        let selected: Vec<&JwtProviderConfig> = match selector {
            None => subs.iter().collect(),
            Some(name) => vec![subs
                .iter()
                .find(|sub| sub.name == name)
                .ok_or_else(|| BindingError::UnknownSubProvider(name.to_string()))?],
        };

        selected
            .into_iter()
            .map(|sub| {
                let endpoint = upstreams.register(&sub.remote_jwks)?;
                Ok(PlanBinding::new(JwtBinding {
                    parent: provider.name.clone(),
                    provider: sub.name.clone(),
                    issuer: sub.issuer.clone(),
                    audiences: sub.audiences.clone(),
                    endpoint,
                    claim_to_headers: sub.claim_to_headers.clone(),
                    extract_from: sub.extract_from.clone(),
                }))
            })
            .collect()
    }
}

type FieldError = (ValidationErrorKind, String);

impl ValidationErrorKind {
    fn with(self, message: impl Into<String>) -> FieldError {
        (self, message.into())
    }
}

fn validate_sub_provider(spec: JwtProviderSpec) -> Result<JwtProviderConfig, Vec<FieldError>> {
    let mut errors = Vec::new();

    if spec.issuer.as_deref() == Some("") {
        errors.push(ValidationErrorKind::InvalidIssuer.with("issuer must not be empty"));
    }

    let mut audiences: Vec<String> = Vec::new();
    for audience in spec.audiences.unwrap_or_default() {
        if audience.is_empty() {
            errors.push(ValidationErrorKind::InvalidAudience.with("audiences must not be empty"));
        } else if !audiences.contains(&audience) {
            audiences.push(audience);
        }
    }

    let remote_jwks = match spec.remote_jwks {
        Some(remote) => validate_remote_jwks(remote).map_err(|errs| errors.extend(errs)).ok(),
        None => {
            errors.push(ValidationErrorKind::MissingRemoteJwks.with("remoteJWKS is required"));
            None
        }
    };

    let claim_to_headers = spec.claim_to_headers.unwrap_or_default();
    let mut headers_seen = HashSet::new();
    for mapping in &claim_to_headers {
        if !is_http_token(&mapping.header) {
            errors.push(ValidationErrorKind::InvalidClaimToHeader.with(format!(
                "'{}' is not a valid header name",
                mapping.header
            )));
        } else if !headers_seen.insert(mapping.header.to_ascii_lowercase()) {
            errors.push(ValidationErrorKind::InvalidClaimToHeader.with(format!(
                "header '{}' is mapped more than once",
                mapping.header
            )));
        }
        if mapping.claim.is_empty() {
            errors.push(ValidationErrorKind::InvalidClaimToHeader.with("claim must not be empty"));
        }
    }

    let extract_from = spec.extract_from.unwrap_or_default();
    if extract_from.headers.is_empty() && extract_from.params.is_empty() {
        errors.push(
            ValidationErrorKind::InvalidExtractor
                .with("extractFrom must name at least one header or query parameter"),
        );
    }
    for header in &extract_from.headers {
        if !is_http_token(&header.name) {
            errors.push(ValidationErrorKind::InvalidExtractor.with(format!(
                "'{}' is not a valid header name",
                header.name
            )));
        }
    }
    if extract_from.params.iter().any(String::is_empty) {
        errors.push(
            ValidationErrorKind::InvalidExtractor.with("query parameter names must not be empty"),
        );
    }

    match remote_jwks {
        Some(remote_jwks) if errors.is_empty() => Ok(JwtProviderConfig {
            name: spec.name,
            issuer: spec.issuer,
            audiences,
            remote_jwks,
            claim_to_headers,
            extract_from,
        }),
        _ => Err(errors),
    }
}

fn validate_remote_jwks(spec: RemoteJwksSpec) -> Result<RemoteJwks, Vec<FieldError>> {
    let mut errors = Vec::new();

    let uri = match spec.uri {
        Some(uri) => match check_jwks_uri(&uri) {
            Ok(()) => Some(uri),
            Err(message) => {
                errors.push(ValidationErrorKind::InvalidUri.with(message));
                None
            }
        },
        None => {
            errors.push(ValidationErrorKind::InvalidUri.with("remoteJWKS.uri is required"));
            None
        }
    };

    let timeout = parse_duration("timeout", spec.timeout.as_deref(), DEFAULT_FETCH_TIMEOUT)
        .map_err(|e| errors.push(e))
        .ok();
    let refresh_interval = parse_duration(
        "refreshInterval",
        spec.refresh_interval.as_deref(),
        DEFAULT_REFRESH_INTERVAL,
    )
    .map_err(|e| errors.push(e))
    .ok();

    if let (Some(timeout), Some(refresh_interval)) = (timeout, refresh_interval) {
        if timeout >= refresh_interval {
            errors.push(ValidationErrorKind::TimeoutNotBelowRefreshInterval.with(format!(
                "timeout ({}) must be less than refreshInterval ({})",
                humantime_serde::re::humantime::format_duration(timeout),
                humantime_serde::re::humantime::format_duration(refresh_interval),
            )));
        }
    }

    let retry_policy = validate_retry_policy(spec.retry_policy)
        .map_err(|errs| errors.extend(errs))
        .ok();

    match (uri, timeout, refresh_interval, retry_policy) {
        (Some(uri), Some(timeout), Some(refresh_interval), Some(retry_policy))
            if errors.is_empty() =>
        {
            Ok(RemoteJwks {
                uri,
                timeout,
                refresh_interval,
                retry_policy,
            })
        }
        _ => Err(errors),
    }
}

fn validate_retry_policy(spec: Option<RetryPolicySpec>) -> Result<RetryPolicy, Vec<FieldError>> {
    let Some(spec) = spec else {
        return Ok(RetryPolicy::default());
    };
    let backoff = spec.backoff.unwrap_or(BackoffSpec {
        base_interval: None,
        max_interval: None,
    });

    let mut errors = Vec::new();
    let base_interval = parse_duration(
        "retryPolicy.backoff.baseInterval",
        backoff.base_interval.as_deref(),
        DEFAULT_BACKOFF_BASE,
    )
    .map_err(|e| errors.push(e))
    .ok();
    let max_interval = parse_duration(
        "retryPolicy.backoff.maxInterval",
        backoff.max_interval.as_deref(),
        DEFAULT_BACKOFF_MAX,
    )
    .map_err(|e| errors.push(e))
    .ok();

    match (base_interval, max_interval) {
        (Some(base_interval), Some(max_interval)) if errors.is_empty() => {
            if max_interval < base_interval {
                return Err(vec![ValidationErrorKind::InvalidRetryPolicy
                    .with("retryPolicy.backoff.maxInterval must not be below baseInterval")]);
            }
            Ok(RetryPolicy {
                num_retries: spec.num_retries.unwrap_or(DEFAULT_NUM_RETRIES),
                base_interval,
                max_interval,
            })
        }
        _ => Err(errors),
    }
}

/// Parse a humantime duration, which must be strictly positive.
fn parse_duration(
    field: &str,
    raw: Option<&str>,
    default: Duration,
) -> Result<Duration, FieldError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match humantime_serde::re::humantime::parse_duration(raw) {
        Ok(duration) if duration.is_zero() => Err(ValidationErrorKind::InvalidDuration
            .with(format!("{field} must be greater than zero"))),
        Ok(duration) => Ok(duration),
        Err(e) => Err(ValidationErrorKind::InvalidDuration
            .with(format!("{field} '{raw}' is not a valid duration: {e}"))),
    }
}

/// Absolute `http`/`https` URL with a host.
fn check_jwks_uri(uri: &str) -> Result<(), String> {
    let parsed = url::Url::parse(uri).map_err(|e| format!("'{uri}' is not a valid URL: {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("'{uri}' must use http or https"));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(format!("'{uri}' has no host"));
    }
    Ok(())
}

/// RFC 9110 `token`, the grammar of header field names.
pub(crate) fn is_http_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}
