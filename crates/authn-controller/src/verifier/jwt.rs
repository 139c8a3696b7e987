//! Verification for JWT bindings.
//!
//! A token is malformed or uses an unsupported algorithm regardless of which
//! binding reads it, so those rejections are final. Otherwise a binding
//! whose issuer constraint does not match steps aside, and a binding whose
//! key verifies the signature decides the outcome: time and audience
//! failures reject without falling through to later bindings.

use crate::keys::KeySet;
use crate::providers::{JwtBinding, JWT_TYPE_TAG};
use crate::verifier::{
    extract_credential, BindingCheck, BindingVerdict, CheckContext, Claims, RejectReason,
    RequestCredentials, VerificationOutcome,
};
use common::jwt::{inspect_token, validate_time_claims_at, JwtValidationError};
use jsonwebtoken::{decode, Algorithm, Validation};
use serde_json::{Map, Value};
use std::any::Any;
use std::str::FromStr;

impl BindingCheck for JwtBinding {
    fn type_tag(&self) -> &'static str {
        JWT_TYPE_TAG
    }

    fn qualified_name(&self) -> String {
        format!("{}/{}", self.parent, self.provider)
    }

    fn extract<'r>(&self, request: &'r RequestCredentials) -> Option<&'r str> {
        extract_credential(&self.extract_from, request)
    }

    fn check(&self, credential: &str, ctx: &CheckContext<'_>) -> BindingVerdict {
        let Ok(unverified) = inspect_token(credential) else {
            return BindingVerdict::Decided(VerificationOutcome::Rejected(
                RejectReason::MalformedCredential,
            ));
        };

        let alg = match Algorithm::from_str(&unverified.header.alg) {
            Ok(Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) | Err(_) => {
                tracing::debug!(target: "authn.verifier", alg = %unverified.header.alg, "Unsupported token algorithm");
                return BindingVerdict::Decided(VerificationOutcome::Rejected(
                    RejectReason::UnsupportedAlgorithm,
                ));
            }
            Ok(alg) => alg,
        };

        if let Some(issuer) = self.issuer.as_deref() {
            if unverified.issuer.as_deref() != Some(issuer) {
                return BindingVerdict::NotApplicable;
            }
        }

        let Some(keys) = ctx.keys.snapshot(&self.endpoint) else {
            tracing::debug!(
                target: "authn.verifier",
                provider = %self.parent,
                jwt_provider = %self.provider,
                endpoint = %self.endpoint,
                "No key set yet"
            );
            return BindingVerdict::Unverifiable;
        };

        match verify_signature(credential, alg, unverified.header.kid.as_deref(), &keys) {
            Some(claims) => BindingVerdict::Decided(self.authorize(claims, ctx)),
            None => BindingVerdict::NoMatch,
        }
    }

    fn describe(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl JwtBinding {
    /// Time and audience checks once this binding's key verified the token.
    fn authorize(&self, claims: Claims, ctx: &CheckContext<'_>) -> VerificationOutcome {
        let (Ok(exp), Ok(nbf), Ok(iat)) = (
            claims.timestamp("exp"),
            claims.timestamp("nbf"),
            claims.timestamp("iat"),
        ) else {
            return VerificationOutcome::Rejected(RejectReason::MalformedCredential);
        };

        if let Err(e) = validate_time_claims_at(exp, nbf, iat, ctx.clock_skew, ctx.now) {
            let reason = match e {
                JwtValidationError::Expired => RejectReason::Expired,
                JwtValidationError::NotYetValid => RejectReason::NotYetValid,
                JwtValidationError::IatTooFarInFuture => RejectReason::IssuedInFuture,
                JwtValidationError::TokenTooLarge | JwtValidationError::MalformedToken => {
                    RejectReason::MalformedCredential
                }
            };
            return VerificationOutcome::Rejected(reason);
        }

        if !self.audiences.is_empty()
            && !claims
                .audiences()
                .iter()
                .any(|aud| self.audiences.iter().any(|allowed| allowed == aud))
        {
            return VerificationOutcome::Rejected(RejectReason::AudienceMismatch);
        }

        let headers = self
            .claim_to_headers
            .iter()
            .filter_map(|mapping| {
                claims
                    .header_value(&mapping.claim)
                    .map(|value| (mapping.header.clone(), value))
            })
            .collect();

        tracing::debug!(
            target: "authn.verifier",
            provider = %self.parent,
            jwt_provider = %self.provider,
            "Credential accepted"
        );

        VerificationOutcome::Authenticated {
            provider: self.parent.clone(),
            claims,
            headers,
        }
    }
}

/// Signature-only validation; time and audience are checked afterwards so
/// each failure maps to its own reason.
fn signature_validation(alg: Algorithm) -> Validation {
    let mut validation = Validation::new(alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation.leeway = 0;
    validation
}

/// Try the token against the candidate keys: the `kid` match, or every key
/// supporting `alg` when the token names no key.
fn verify_signature(
    token: &str,
    alg: Algorithm,
    kid: Option<&str>,
    keys: &KeySet,
) -> Option<Claims> {
    let validation = signature_validation(alg);
    let candidates: Vec<_> = match kid {
        Some(kid) => keys.get(kid).into_iter().filter(|k| k.supports(alg)).collect(),
        None => keys.keys().filter(|k| k.supports(alg)).collect(),
    };

    candidates.into_iter().find_map(|key| {
        match decode::<Map<String, Value>>(token, key.decoding_key(), &validation) {
            Ok(data) => Some(Claims::new(data.claims)),
            Err(e) => {
                tracing::debug!(target: "authn.verifier", kid = %key.kid(), error = %e, "Signature verification failed");
                None
            }
        }
    })
}
