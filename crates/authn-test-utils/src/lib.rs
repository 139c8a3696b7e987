//! # Authn Test Utilities
//!
//! Shared test utilities for the authentication controller.
//!
//! This crate provides:
//! - Crypto fixtures (Ed25519, ES256 and RS256 keys and their JWKs)
//! - Test data builders (TestTokenBuilder, PolicyBuilder)
//! - A mock JWKS server backed by wiremock
//! - Fixed test identifiers (issuers, audiences, key ids)
//! - Custom assertions (TokenAssertions trait)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use authn_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let key = test_signing_key(1)?;
//!     let server = MockJwksServer::start(&[&key]).await;
//!
//!     let token = TestTokenBuilder::new()
//!         .issuer(TEST_ISSUER)
//!         .audience(TEST_AUDIENCE)
//!         .sign(&key);
//!
//!     token.assert_valid_jwt().assert_signed_by(&key.kid);
//! }
//! ```

pub mod assertions;
pub mod crypto_fixtures;
pub mod jwks_server;
pub mod policy_builders;
pub mod test_ids;
pub mod token_builders;

// Re-export commonly used items
pub use assertions::*;
pub use crypto_fixtures::*;
pub use jwks_server::*;
pub use policy_builders::*;
pub use test_ids::*;
pub use token_builders::*;
