//! Common identifier types shared by the authentication controller crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of one remote JWKS endpoint.
///
/// The same value names the synthetic upstream cluster used to reach the
/// endpoint and the Key Cache entry holding its keys, so providers that share
/// a URI share both.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Wrap an already-derived endpoint identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
