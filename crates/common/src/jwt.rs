//! JWT utilities shared by the authentication controller crates.
//!
//! This module provides the parsing helpers that run *before* any signature
//! verification:
//! - Size limits for DoS prevention
//! - Clock skew constants for time-claim validation
//! - Header and issuer inspection (no signature check)
//! - `exp` / `nbf` / `iat` validation logic
//! - JWK public key decoding
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Nothing returned by [`inspect_token`] is trusted; it only selects which
//!   key and provider to try
//! - Error messages are generic; details are logged at debug level
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{inspect_token, validate_time_claims, DEFAULT_CLOCK_SKEW};
//!
//! let unverified = inspect_token(token)?;
//! let kid = unverified.header.kid.as_deref();
//!
//! // After signature verification:
//! validate_time_claims(claims.exp, claims.nbf, claims.iat, DEFAULT_CLOCK_SKEW)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Credentials larger than this are rejected BEFORE any base64 decoding or
/// cryptographic work. Typical tokens are well under 2KB.
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default clock skew tolerance applied to `exp`, `nbf` and `iat` (60 seconds).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Maximum allowed clock skew tolerance (10 minutes).
///
/// Prevents misconfiguration that would make expiry checks meaningless.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while inspecting or time-validating a JWT.
///
/// Display strings are intentionally generic to prevent information leakage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token `exp` claim is in the past.
    #[error("The access token is invalid or expired")]
    Expired,

    /// Token `nbf` claim is in the future.
    #[error("The access token is invalid or expired")]
    NotYetValid,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Unverified token view
// =============================================================================

/// The JOSE header fields needed for key selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// Signing algorithm named by the token (e.g. `EdDSA`, `RS256`).
    pub alg: String,

    /// Key ID, if the issuer sets one.
    #[serde(default)]
    pub kid: Option<String>,
}

/// A parsed but NOT verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnverifiedToken {
    /// Decoded header.
    pub header: TokenHeader,

    /// The `iss` claim, if present and a string.
    pub issuer: Option<String>,
}

#[derive(Deserialize)]
struct IssuerOnly {
    #[serde(default)]
    iss: Option<serde_json::Value>,
}

// =============================================================================
// Functions
// =============================================================================

/// Decode the header and the `iss` claim of a JWT without verifying it.
///
/// # Security
///
/// - Token size is checked BEFORE any parsing
/// - The returned values are untrusted and may only be used to pick a
///   provider and a key; the token MUST still be verified
/// - An empty `kid` is treated as malformed
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Wrong structure, bad base64, invalid JSON, missing `alg`
pub fn inspect_token(token: &str) -> Result<UnverifiedToken, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let (Some(header_part), Some(payload_part), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;
    let header: TokenHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    if header.kid.as_deref() == Some("") {
        tracing::debug!(target: "common.jwt", "Token rejected: empty kid");
        return Err(JwtValidationError::MalformedToken);
    }

    let payload_bytes = URL_SAFE_NO_PAD.decode(payload_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT payload base64");
        JwtValidationError::MalformedToken
    })?;
    let payload: IssuerOnly = serde_json::from_slice(&payload_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT payload JSON");
        JwtValidationError::MalformedToken
    })?;

    let issuer = match payload.iss {
        Some(serde_json::Value::String(iss)) => Some(iss),
        _ => None,
    };

    Ok(UnverifiedToken { header, issuer })
}

/// Validate `exp`, `nbf` and `iat` against the current time.
///
/// Each claim is optional; an absent claim is not checked. `clock_skew` is
/// applied in the lenient direction for all three.
///
/// # Errors
///
/// Returns `Expired`, `NotYetValid` or `IatTooFarInFuture`.
pub fn validate_time_claims(
    exp: Option<i64>,
    nbf: Option<i64>,
    iat: Option<i64>,
    clock_skew: Duration,
) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_time_claims_at(exp, nbf, iat, clock_skew, now)
}

/// Deterministic variant of [`validate_time_claims`] against an explicit `now`.
///
/// # Errors
///
/// See [`validate_time_claims`].
pub fn validate_time_claims_at(
    exp: Option<i64>,
    nbf: Option<i64>,
    iat: Option<i64>,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Safe cast: clock_skew is bounded to MAX_CLOCK_SKEW by configuration
    #[allow(clippy::cast_possible_wrap)]
    let skew = clock_skew.as_secs() as i64;

    if let Some(exp) = exp {
        if exp.saturating_add(skew) <= now {
            tracing::debug!(target: "common.jwt", exp, now, "Token rejected: expired");
            return Err(JwtValidationError::Expired);
        }
    }

    if let Some(nbf) = nbf {
        if nbf.saturating_sub(skew) > now {
            tracing::debug!(target: "common.jwt", nbf, now, "Token rejected: not yet valid");
            return Err(JwtValidationError::NotYetValid);
        }
    }

    if let Some(iat) = iat {
        validate_iat_at(iat, clock_skew, now)?;
    }

    Ok(())
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

/// Decode an Ed25519 public key from a JWK `x` field (base64url, no padding).
///
/// # Errors
///
/// Returns `base64::DecodeError` if the content cannot be decoded.
pub fn decode_ed25519_public_key_jwk(x_b64url: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(x_b64url)
}

// =============================================================================
// Tests
// =============================================================================
