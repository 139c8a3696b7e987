//! Provider Registry.
//!
//! Validates `AuthenticationProvider` objects and resolves their
//! type-specific payloads through registered [`ProviderTypeHandler`]s. The
//! dispatch here only ever looks at the type tag; everything type-specific
//! lives behind the handler: the validated configuration is opaque to the
//! registry, and the plan bindings a handler compiles carry their own
//! verification logic (see [`BindingCheck`](crate::verifier::BindingCheck)).
//!
//! Validation is pure and collects every error instead of stopping at the
//! first one.

pub mod jwt;

use crate::compiler::{PlanBinding, UpstreamSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use jwt::{
    ClaimToHeader, ExtractFrom, HeaderExtractor, JwtBinding, JwtProviderConfig,
    JwtProviderHandler, JWT_TYPE_TAG,
};

/// Maximum length of a provider name (RFC 1123 subdomain).
pub const MAX_PROVIDER_NAME_LENGTH: usize = 253;

/// Maximum length of one DNS label.
pub const MAX_LABEL_LENGTH: usize = 63;

// =============================================================================
// Input
// =============================================================================

/// A named, typed authentication configuration as read from config.
///
/// Type-specific payload fields (e.g. `jwtProviders`) are kept as raw JSON
/// so the union check can see every populated field, known or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationProvider {
    pub name: String,

    #[serde(rename = "type")]
    pub provider_type: String,

    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

// =============================================================================
// Errors
// =============================================================================

/// Category of a provider validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ValidationErrorKind {
    InvalidName,
    DuplicateName,
    UnsupportedType,
    UnionMismatch,
    InvalidPayload,
    MissingRemoteJwks,
    InvalidUri,
    InvalidDuration,
    TimeoutNotBelowRefreshInterval,
    InvalidRetryPolicy,
    InvalidIssuer,
    InvalidAudience,
    InvalidClaimToHeader,
    InvalidExtractor,
}

impl ValidationErrorKind {
    /// Stable snake_case label for metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationErrorKind::InvalidName => "invalid_name",
            ValidationErrorKind::DuplicateName => "duplicate_name",
            ValidationErrorKind::UnsupportedType => "unsupported_type",
            ValidationErrorKind::UnionMismatch => "union_mismatch",
            ValidationErrorKind::InvalidPayload => "invalid_payload",
            ValidationErrorKind::MissingRemoteJwks => "missing_remote_jwks",
            ValidationErrorKind::InvalidUri => "invalid_uri",
            ValidationErrorKind::InvalidDuration => "invalid_duration",
            ValidationErrorKind::TimeoutNotBelowRefreshInterval => {
                "timeout_not_below_refresh_interval"
            }
            ValidationErrorKind::InvalidRetryPolicy => "invalid_retry_policy",
            ValidationErrorKind::InvalidIssuer => "invalid_issuer",
            ValidationErrorKind::InvalidAudience => "invalid_audience",
            ValidationErrorKind::InvalidClaimToHeader => "invalid_claim_to_header",
            ValidationErrorKind::InvalidExtractor => "invalid_extractor",
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One problem found while validating a provider.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("provider '{provider}': {message}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_provider: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(
        kind: ValidationErrorKind,
        provider: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            provider: provider.into(),
            sub_provider: None,
            message: message.into(),
        }
    }

    /// Attach the offending sub-provider.
    #[must_use]
    pub fn in_sub_provider(mut self, sub_provider: impl Into<String>) -> Self {
        self.sub_provider = Some(sub_provider.into());
        self
    }
}

/// Why a handler could not turn a provider reference into bindings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("sub-provider '{0}' not found")]
    UnknownSubProvider(String),

    #[error("invalid JWKS URI '{0}'")]
    InvalidUri(String),

    #[error("{0}")]
    Unusable(String),
}

// =============================================================================
// Validated output
// =============================================================================

/// Type-specific validated configuration. Only the handler that produced it
/// knows the concrete type; see [`ResolvedProvider::config`].
pub type ProviderConfig = Arc<dyn Any + Send + Sync>;

/// A provider that passed validation, together with its handler.
#[derive(Clone)]
pub struct ResolvedProvider {
    pub name: String,
    pub config: ProviderConfig,
    handler: Arc<dyn ProviderTypeHandler>,
}

impl ResolvedProvider {
    /// The validated configuration, if it is a `T`.
    #[must_use]
    pub fn config<T: Any>(&self) -> Option<&T> {
        self.config.downcast_ref::<T>()
    }

    /// Type tag of the handler that validated this provider.
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        self.handler.type_tag()
    }

    /// Expand a reference into plan bindings.
    ///
    /// `selector` names one sub-provider; `None` binds all of them.
    ///
    /// # Errors
    ///
    /// See [`ProviderTypeHandler::compile`].
    pub fn compile(
        &self,
        selector: Option<&str>,
        upstreams: &mut UpstreamSet,
    ) -> Result<Vec<PlanBinding>, BindingError> {
        self.handler.compile(self, selector, upstreams)
    }
}

impl fmt::Debug for ResolvedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedProvider")
            .field("name", &self.name)
            .field("type", &self.type_tag())
            .finish_non_exhaustive()
    }
}

/// Providers that passed validation, plus the names of those that did not.
#[derive(Debug, Clone, Default)]
pub struct ValidatedProviders {
    providers: BTreeMap<String, ResolvedProvider>,
    rejected: BTreeSet<String>,
}

impl ValidatedProviders {
    /// Look up a valid provider.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResolvedProvider> {
        self.providers.get(name)
    }

    /// Whether a provider with this name was declared but failed validation.
    #[must_use]
    pub fn is_rejected(&self, name: &str) -> bool {
        self.rejected.contains(name)
    }

    /// Valid providers, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedProvider> {
        self.providers.values()
    }

    /// Names of rejected providers, ordered.
    pub fn rejected(&self) -> impl Iterator<Item = &str> {
        self.rejected.iter().map(String::as_str)
    }

    /// Number of valid providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider passed validation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

// =============================================================================
// Extension contract
// =============================================================================

/// Everything the registry and compiler need to know about one provider type.
pub trait ProviderTypeHandler: Send + Sync {
    /// Value of the `type` discriminator, e.g. `JWT`.
    fn type_tag(&self) -> &'static str;

    /// Name of the payload field that carries this type's configuration.
    fn payload_field(&self) -> &'static str;

    /// Validate the payload of `provider`. The returned configuration is
    /// handed back to [`compile`](Self::compile) unchanged.
    ///
    /// # Errors
    ///
    /// Returns every problem found in the payload.
    fn validate(&self, provider: &str, payload: &Value)
        -> Result<ProviderConfig, Vec<ValidationError>>;

    /// Expand a reference to `provider` into plan bindings, registering any
    /// upstream it needs.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSubProvider` when `selector` names nothing, or
    /// `Unusable` when the provider cannot be bound.
    fn compile(
        &self,
        provider: &ResolvedProvider,
        selector: Option<&str>,
        upstreams: &mut UpstreamSet,
    ) -> Result<Vec<PlanBinding>, BindingError>;
}

/// Type tag → handler.
#[derive(Clone)]
pub struct ProviderRegistry {
    handlers: BTreeMap<&'static str, Arc<dyn ProviderTypeHandler>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(JwtProviderHandler));
        registry
    }
}

impl ProviderRegistry {
    /// Registry with the built-in `JWT` type.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with no types at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Add (or replace) the handler for its type tag.
    pub fn register(&mut self, handler: Arc<dyn ProviderTypeHandler>) {
        self.handlers.insert(handler.type_tag(), handler);
    }

    /// Registered type tags, ordered.
    pub fn type_tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Validate every provider.
    ///
    /// # Errors
    ///
    /// Returns all validation errors if any provider is invalid.
    pub fn validate(
        &self,
        raw: &[AuthenticationProvider],
    ) -> Result<ValidatedProviders, Vec<ValidationError>> {
        let (validated, errors) = self.validate_partial(raw);
        if errors.is_empty() {
            Ok(validated)
        } else {
            Err(errors)
        }
    }

    /// Validate every provider, keeping the valid ones alongside the errors
    /// of the invalid ones.
    pub fn validate_partial(
        &self,
        raw: &[AuthenticationProvider],
    ) -> (ValidatedProviders, Vec<ValidationError>) {
        let mut occurrences: HashMap<&str, usize> = HashMap::new();
        for provider in raw {
            *occurrences.entry(provider.name.as_str()).or_default() += 1;
        }

        let mut validated = ValidatedProviders::default();
        let mut errors = Vec::new();

        for provider in raw {
            let mut provider_errors = Vec::new();

            if !is_valid_subdomain(&provider.name) {
                provider_errors.push(ValidationError::new(
                    ValidationErrorKind::InvalidName,
                    &provider.name,
                    "name must be a lowercase RFC 1123 subdomain of at most 253 characters",
                ));
            }

            // Every occurrence is rejected; no declaration wins.
            if occurrences.get(provider.name.as_str()).copied().unwrap_or(0) > 1 {
                provider_errors.push(ValidationError::new(
                    ValidationErrorKind::DuplicateName,
                    &provider.name,
                    "provider name is declared more than once",
                ));
            }

            let resolved = match self.handlers.get(provider.provider_type.as_str()) {
                None => {
                    provider_errors.push(ValidationError::new(
                        ValidationErrorKind::UnsupportedType,
                        &provider.name,
                        format!("unsupported provider type '{}'", provider.provider_type),
                    ));
                    None
                }
                Some(handler) => match check_union(provider, handler.as_ref()) {
                    Err(union_errors) => {
                        provider_errors.extend(union_errors);
                        None
                    }
                    Ok(payload) => match handler.validate(&provider.name, payload) {
                        Ok(config) => Some(ResolvedProvider {
                            name: provider.name.clone(),
                            config,
                            handler: Arc::clone(handler),
                        }),
                        Err(payload_errors) => {
                            provider_errors.extend(payload_errors);
                            None
                        }
                    },
                },
            };

            match resolved {
                Some(resolved) if provider_errors.is_empty() => {
                    tracing::debug!(target: "authn.providers", provider = %provider.name, "Provider accepted");
                    validated.providers.insert(provider.name.clone(), resolved);
                }
                _ => {
                    tracing::debug!(
                        target: "authn.providers",
                        provider = %provider.name,
                        error_count = provider_errors.len(),
                        "Provider rejected"
                    );
                    validated.rejected.insert(provider.name.clone());
                    errors.extend(provider_errors);
                }
            }
        }

        (validated, errors)
    }
}

/// Exactly the declared type's payload field may be populated.
fn check_union<'a>(
    provider: &'a AuthenticationProvider,
    handler: &dyn ProviderTypeHandler,
) -> Result<&'a Value, Vec<ValidationError>> {
    let expected = handler.payload_field();
    let mut errors = Vec::new();

    for (field, value) in &provider.payload {
        if field != expected && is_populated(value) {
            errors.push(ValidationError::new(
                ValidationErrorKind::UnionMismatch,
                &provider.name,
                format!(
                    "field '{field}' is not allowed for type '{}'",
                    handler.type_tag()
                ),
            ));
        }
    }

    let payload = provider.payload.get(expected).filter(|v| is_populated(v));
    if payload.is_none() {
        errors.push(ValidationError::new(
            ValidationErrorKind::UnionMismatch,
            &provider.name,
            format!(
                "type '{}' requires a non-empty '{expected}'",
                handler.type_tag()
            ),
        ));
    }

    match payload {
        Some(payload) if errors.is_empty() => Ok(payload),
        _ => Err(errors),
    }
}

/// Validate with the default registry.
///
/// # Errors
///
/// Returns all validation errors if any provider is invalid.
pub fn validate(
    raw: &[AuthenticationProvider],
) -> Result<ValidatedProviders, Vec<ValidationError>> {
    ProviderRegistry::default().validate(raw)
}

fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        Value::String(s) => !s.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// RFC 1123 label: 1-63 lowercase alphanumerics or `-`, alphanumeric at
/// both ends.
#[must_use]
pub fn is_valid_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    bytes.len() <= MAX_LABEL_LENGTH
        && first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

/// RFC 1123 subdomain: dot-separated labels, at most 253 characters.
#[must_use]
pub fn is_valid_subdomain(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_PROVIDER_NAME_LENGTH
        && name.split('.').all(is_valid_label)
}
