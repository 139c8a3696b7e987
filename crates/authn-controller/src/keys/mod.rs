//! Remote signing-key management.
//!
//! # Components
//!
//! - `key_set` - Parsed JWKS documents (kid -> verification key)
//! - `fetcher` - One bounded HTTP fetch of a JWKS document
//! - `cache` - Per-endpoint snapshots and the background refresh loops

pub mod cache;
pub mod fetcher;
pub mod key_set;

pub use cache::{CacheState, EndpointStatus, KeyCache};
pub use fetcher::{FetchError, HttpJwksFetcher, JwksFetcher};
pub use key_set::{KeySet, VerificationKey};

use serde::Serialize;
use std::time::Duration;

/// Default JWKS fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default JWKS refresh interval (5 minutes).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Default number of backoff retries before an entry is marked Failed.
pub const DEFAULT_NUM_RETRIES: u32 = 3;

/// Initial backoff delay for retry.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Maximum backoff delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Retry/backoff policy for one JWKS endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Failed fetches retried with backoff before the entry is marked Failed.
    pub num_retries: u32,

    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub base_interval: Duration,

    /// Upper bound for the exponential backoff.
    #[serde(with = "humantime_serde")]
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            num_retries: DEFAULT_NUM_RETRIES,
            base_interval: DEFAULT_BACKOFF_BASE,
            max_interval: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the retry following the `failures`-th consecutive failure.
    ///
    /// `base * 2^(failures - 1)`, capped at `max_interval`.
    #[must_use]
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base_interval
            .saturating_mul(1u32 << exponent)
            .min(self.max_interval)
    }
}

/// A validated remote key-set source, as consumed by the Key Cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteJwks {
    /// Absolute `http`/`https` URI of the JWKS document.
    pub uri: String,

    /// Bound on one fetch, also the upstream connect timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Interval between successful refreshes.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// Backoff policy applied after failed fetches.
    pub retry_policy: RetryPolicy,
}

impl RemoteJwks {
    /// Create a source with default timeout, refresh interval and retry policy.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            timeout: DEFAULT_FETCH_TIMEOUT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Set the fetch timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the refresh interval.
    #[must_use]
    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}
