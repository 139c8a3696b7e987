//! JWKS fetcher.
//!
//! One bounded GET of a key-set document. No caching and no retry; the Key
//! Cache owns both.

use crate::keys::key_set::KeySet;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Maximum accepted JWKS body size (1 MiB).
pub const MAX_JWKS_BODY_BYTES: usize = 1024 * 1024;

/// Why a fetch produced no key set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("JWKS fetch timed out")]
    Timeout,

    #[error("JWKS connection failed: {0}")]
    ConnectionError(String),

    #[error("JWKS endpoint returned HTTP {0}")]
    HttpStatus(u16),

    #[error("JWKS document is invalid: {0}")]
    ParseError(String),
}

impl FetchError {
    /// Short label for metrics and status reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::ConnectionError(_) => "connection_error",
            FetchError::HttpStatus(_) => "http_status",
            FetchError::ParseError(_) => "parse_error",
        }
    }
}

/// Retrieves one key-set document.
///
/// Implementations must be stateless with respect to caching; every call
/// performs a new fetch.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    /// Fetch and parse the key set at `uri`, giving up after `timeout`.
    async fn fetch(&self, uri: &str, timeout: Duration) -> Result<KeySet, FetchError>;
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpJwksFetcher {
    http_client: reqwest::Client,
}

impl HttpJwksFetcher {
    /// Create a fetcher with a fresh HTTP client.
    #[must_use]
    pub fn new() -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("authn-controller/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "authn.keys.fetch", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });
        Self { http_client }
    }

    /// Create a fetcher sharing an existing client.
    #[must_use]
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    async fn fetch_inner(&self, uri: &str, timeout: Duration) -> Result<KeySet, FetchError> {
        let mut response = self
            .http_client
            .get(uri)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::ConnectionError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        if response
            .content_length()
            .is_some_and(|len| len > MAX_JWKS_BODY_BYTES as u64)
        {
            return Err(FetchError::ParseError(format!(
                "body exceeds {MAX_JWKS_BODY_BYTES} bytes"
            )));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::ConnectionError(e.to_string())
            }
        })? {
            if body.len() + chunk.len() > MAX_JWKS_BODY_BYTES {
                return Err(FetchError::ParseError(format!(
                    "body exceeds {MAX_JWKS_BODY_BYTES} bytes"
                )));
            }
            body.extend_from_slice(&chunk);
        }

        KeySet::from_json(&body)
    }
}

impl Default for HttpJwksFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    #[instrument(skip(self), fields(uri = %uri))]
    async fn fetch(&self, uri: &str, timeout: Duration) -> Result<KeySet, FetchError> {
        tracing::debug!(target: "authn.keys.fetch", uri = %uri, "Fetching JWKS");

        // Bounds connect, headers and body together.
        let result = match tokio::time::timeout(timeout, self.fetch_inner(uri, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };

        match &result {
            Ok(keys) => {
                tracing::debug!(target: "authn.keys.fetch", uri = %uri, key_count = keys.len(), "JWKS fetched");
            }
            Err(e) => {
                tracing::warn!(target: "authn.keys.fetch", uri = %uri, error = %e, "JWKS fetch failed");
            }
        }

        result
    }
}
