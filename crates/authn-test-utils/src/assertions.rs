//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions over encoded test tokens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::Value;

fn decode_segment(token: &str, index: usize) -> Value {
    let segment = token
        .split('.')
        .nth(index)
        .unwrap_or_else(|| panic!("JWT has no segment {index}"));
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .expect("Invalid JWT base64url segment");
    serde_json::from_slice(&bytes).expect("Failed to parse JWT segment JSON")
}

/// Custom assertions for encoded tokens
///
/// # Example
/// ```rust,ignore
/// token
///     .assert_valid_jwt()
///     .assert_signed_by("test-key-1")
///     .assert_claim("iss", "https://www.example.com");
/// ```
pub trait TokenAssertions {
    /// Assert that the token is a three-part EdDSA JWT
    fn assert_valid_jwt(&self) -> &Self;

    /// Assert that the header names the specified key
    fn assert_signed_by(&self, key_id: &str) -> &Self;

    /// Assert that a claim has the given string value
    fn assert_claim(&self, name: &str, expected: &str) -> &Self;

    /// Assert that a claim is absent
    fn assert_no_claim(&self, name: &str) -> &Self;
}

impl TokenAssertions for String {
    fn assert_valid_jwt(&self) -> &Self {
        let parts = self.split('.').count();
        assert_eq!(
            parts, 3,
            "JWT must have 3 parts (header.payload.signature), got {}",
            parts
        );

        let header = decode_segment(self, 0);
        assert_eq!(header["alg"], "EdDSA", "Expected EdDSA algorithm");

        let claims = decode_segment(self, 1);
        assert!(claims.is_object(), "JWT payload must be a JSON object");

        self
    }

    fn assert_signed_by(&self, key_id: &str) -> &Self {
        let header = decode_segment(self, 0);
        assert_eq!(
            header["kid"].as_str(),
            Some(key_id),
            "Expected key_id '{}', got {:?}",
            key_id,
            header.get("kid")
        );
        self
    }

    fn assert_claim(&self, name: &str, expected: &str) -> &Self {
        let claims = decode_segment(self, 1);
        assert_eq!(
            claims[name].as_str(),
            Some(expected),
            "Expected claim '{}' = '{}', got {:?}",
            name,
            expected,
            claims.get(name)
        );
        self
    }

    fn assert_no_claim(&self, name: &str) -> &Self {
        let claims = decode_segment(self, 1);
        assert!(
            claims.get(name).is_none(),
            "Expected no '{}' claim, got {:?}",
            name,
            claims.get(name)
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(header: &str, payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(header.as_bytes()),
            URL_SAFE_NO_PAD.encode(payload.as_bytes())
        )
    }

    #[test]
    fn test_assert_valid_jwt_with_valid_token() {
        let token = token(
            r#"{"alg":"EdDSA","typ":"JWT","kid":"test-key-1"}"#,
            r#"{"iss":"https://www.example.com","exp":9999999999}"#,
        );

        token
            .assert_valid_jwt()
            .assert_signed_by("test-key-1")
            .assert_claim("iss", "https://www.example.com")
            .assert_no_claim("aud");
    }

    #[test]
    #[should_panic(expected = "JWT must have 3 parts")]
    fn test_assert_valid_jwt_with_invalid_structure() {
        "invalid.token".to_string().assert_valid_jwt();
    }

    #[test]
    #[should_panic(expected = "Expected claim 'sub'")]
    fn test_assert_claim_mismatch() {
        token(r#"{"alg":"EdDSA"}"#, r#"{"sub":"bob"}"#).assert_claim("sub", "alice");
    }
}
