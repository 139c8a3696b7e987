//! Verified JWT claims.
//!
//! Claims are kept as the raw JSON object since providers are free to add
//! any claim. The `sub` value is redacted in Debug output to prevent
//! exposure in logs.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// A registered time claim held something other than a number.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("claim '{0}' is not a numeric date")]
pub struct ClaimTypeError(pub &'static str);

/// Claims of a token whose signature has been verified.
#[derive(Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    #[must_use]
    pub fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// Raw claim value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// The `iss` claim, if it is a string.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.0.get("iss").and_then(Value::as_str)
    }

    /// The `sub` claim, if it is a string.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(Value::as_str)
    }

    /// The `aud` claim as a list; a single string counts as one audience.
    #[must_use]
    pub fn audiences(&self) -> Vec<&str> {
        match self.0.get("aud") {
            Some(Value::String(aud)) => vec![aud.as_str()],
            Some(Value::Array(auds)) => auds.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// A NumericDate claim (`exp`, `nbf`, `iat`) in whole seconds.
    ///
    /// Fractional values are truncated.
    ///
    /// # Errors
    ///
    /// Returns `ClaimTypeError` if the claim is present but not a number.
    pub fn timestamp(&self, name: &'static str) -> Result<Option<i64>, ClaimTypeError> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => {
                #[allow(clippy::cast_possible_truncation)]
                let secs = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64));
                secs.map(Some).ok_or(ClaimTypeError(name))
            }
            Some(_) => Err(ClaimTypeError(name)),
        }
    }

    /// Claim value rendered as a header value.
    ///
    /// Strings are used as-is, numbers and booleans are formatted. Objects,
    /// arrays and strings with control characters yield `None`.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<String> {
        let value = match self.0.get(name)? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        if value.chars().any(char::is_control) {
            return None;
        }
        Some(value)
    }

    /// The underlying JSON object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// Custom Debug implementation that redacts the `sub` field.
impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_map();
        for (name, value) in &self.0 {
            if name == "sub" {
                debug.entry(name, &"[REDACTED]");
            } else {
                debug.entry(name, value);
            }
        }
        debug.finish()
    }
}
