//! Credential extraction from a request.

use crate::providers::ExtractFrom;
use axum::http::HeaderMap;
use std::fmt;

/// The parts of a request a credential can come from.
///
/// Header names are matched case-insensitively; query parameter names are
/// matched exactly. Values are never printed by `Debug`.
#[derive(Clone, Default)]
pub struct RequestCredentials {
    headers: Vec<(String, String)>,
    params: Vec<(String, String)>,
}

impl RequestCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an HTTP header map and raw query string.
    ///
    /// Header values that are not visible ASCII are skipped.
    #[must_use]
    pub fn from_http(headers: &HeaderMap, query: Option<&str>) -> Self {
        let mut request = Self::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                request.headers.push((name.as_str().to_string(), value.to_string()));
            }
        }
        if let Some(query) = query {
            request = request.with_query(query);
        }
        request
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    /// Add the parameters of a raw (`a=1&b=2`) query string.
    #[must_use]
    pub fn with_query(mut self, query: &str) -> Self {
        self.params.extend(
            url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        );
        self
    }

    /// First value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// First value of a query parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for RequestCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCredentials")
            .field("headers", &self.headers.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("params", &self.params.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

/// Find the credential as configured by `extract_from`.
///
/// Headers are tried in order, then query parameters. A header whose value
/// lacks the configured prefix (compared case-insensitively) does not match.
#[must_use]
pub fn extract_credential<'r>(
    extract_from: &ExtractFrom,
    request: &'r RequestCredentials,
) -> Option<&'r str> {
    for header in &extract_from.headers {
        let Some(value) = request.header(&header.name) else {
            continue;
        };
        let token = match header.value_prefix.as_deref() {
            Some(prefix) => match (value.get(..prefix.len()), value.get(prefix.len()..)) {
                (Some(head), Some(rest)) if head.eq_ignore_ascii_case(prefix) => rest.trim(),
                _ => continue,
            },
            None => value.trim(),
        };
        if !token.is_empty() {
            return Some(token);
        }
    }

    extract_from
        .params
        .iter()
        .filter_map(|name| request.param(name))
        .find(|value| !value.is_empty())
}
