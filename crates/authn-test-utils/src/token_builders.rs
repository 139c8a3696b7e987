//! Builder patterns for test data construction
//!
//! Provides a fluent API for creating signed test tokens.

use crate::crypto_fixtures::TestKey;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Header};
use serde_json::{json, Map, Value};

/// Builder for creating test JWTs
///
/// Defaults: subject `test-subject`, issued now, expiring in one hour, no
/// issuer and no audience.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .issuer("https://www.example.com")
///     .audience("bookstore")
///     .expires_in(3600)
///     .sign(&key);
/// ```
#[derive(Debug, Clone)]
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
    kid: Option<Option<String>>,
}

impl TestTokenBuilder {
    /// Create a new token builder with defaults
    pub fn new() -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("sub".to_string(), json!("test-subject"));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert(
            "exp".to_string(),
            json!((now + Duration::seconds(3600)).timestamp()),
        );
        Self { claims, kid: None }
    }

    /// Set the `iss` claim
    pub fn issuer(self, issuer: &str) -> Self {
        self.claim("iss", json!(issuer))
    }

    /// Set the `sub` claim
    pub fn for_subject(self, subject: &str) -> Self {
        self.claim("sub", json!(subject))
    }

    /// Set `aud` to a single string
    pub fn audience(self, audience: &str) -> Self {
        self.claim("aud", json!(audience))
    }

    /// Set `aud` to an array
    pub fn audiences(self, audiences: &[&str]) -> Self {
        self.claim("aud", json!(audiences))
    }

    /// Set expiration in seconds from now (negative for already expired)
    pub fn expires_in(self, seconds: i64) -> Self {
        self.claim("exp", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Set `nbf` in seconds from now
    pub fn not_before_in(self, seconds: i64) -> Self {
        self.claim("nbf", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Set issued-at timestamp
    pub fn issued_at(self, timestamp: i64) -> Self {
        self.claim("iat", json!(timestamp))
    }

    /// Set any claim, replacing a previous value
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Remove a claim, including the defaults
    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Put this `kid` in the header instead of the signing key's
    pub fn with_kid(mut self, kid: &str) -> Self {
        self.kid = Some(Some(kid.to_string()));
        self
    }

    /// Omit `kid` from the header
    pub fn without_kid(mut self) -> Self {
        self.kid = Some(None);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(&self) -> Value {
        Value::Object(self.claims.clone())
    }

    /// Sign with `key` using the key's algorithm. The header `kid` defaults
    /// to the key's.
    pub fn sign(&self, key: &TestKey) -> String {
        let mut header = Header::new(key.algorithm);
        header.kid = match &self.kid {
            Some(kid) => kid.clone(),
            None => Some(key.kid.clone()),
        };
        encode(&header, &self.claims, &key.encoding_key()).expect("test token signing failed")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
