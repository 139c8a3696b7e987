//! Parsed JWKS documents.
//!
//! A [`KeySet`] is built completely from one fetched document before it is
//! published, so readers never observe a partially parsed set.

use crate::keys::fetcher::FetchError;
use common::jwt::decode_ed25519_public_key_jwk;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Maximum accepted length of a `kid`.
pub const MAX_KID_LENGTH: usize = 256;

const RSA_ALGORITHMS: [Algorithm; 6] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// JSON Web Key as published in a JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (`OKP`, `RSA`, `EC`).
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    #[serde(default)]
    pub kid: Option<String>,

    /// Curve name (`Ed25519`, `P-256`, `P-384`).
    #[serde(default)]
    pub crv: Option<String>,

    /// OKP public key, or EC x coordinate (base64url).
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    /// Algorithm the key is intended for.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (`sig` or `enc`).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
}

/// JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    /// List of JSON Web Keys.
    pub keys: Vec<Jwk>,
}

/// One public key ready for signature verification.
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    algorithms: Vec<Algorithm>,
    decoding_key: DecodingKey,
}

impl VerificationKey {
    /// Key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithms this key may verify.
    #[must_use]
    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    /// Whether a token signed with `alg` can be checked against this key.
    #[must_use]
    pub fn supports(&self, alg: Algorithm) -> bool {
        self.algorithms.contains(&alg)
    }

    /// Decoding key for `jsonwebtoken`.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

/// Immutable mapping of key ID to verification key.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: BTreeMap<String, VerificationKey>,
}

impl KeySet {
    /// Parse and validate a JWKS document.
    ///
    /// Every key must carry a non-empty, unique `kid`. Encryption keys and
    /// unsupported key types are skipped; at least one usable signing key
    /// must remain.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::ParseError` for malformed documents.
    pub fn from_json(body: &[u8]) -> Result<Self, FetchError> {
        let document: JwksDocument = serde_json::from_slice(body)
            .map_err(|e| FetchError::ParseError(format!("invalid JWKS JSON: {e}")))?;
        Self::from_document(document)
    }

    /// Build a key set from an already-deserialized document.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::ParseError` for malformed documents.
    pub fn from_document(document: JwksDocument) -> Result<Self, FetchError> {
        let mut keys = BTreeMap::new();

        for jwk in document.keys {
            let kid = match jwk.kid.as_deref() {
                Some(kid) if !kid.is_empty() && kid.len() <= MAX_KID_LENGTH => kid.to_string(),
                Some(_) => {
                    return Err(FetchError::ParseError(
                        "key has an empty or oversized kid".to_string(),
                    ))
                }
                None => return Err(FetchError::ParseError("key is missing kid".to_string())),
            };

            if keys.contains_key(&kid) {
                return Err(FetchError::ParseError(format!("duplicate kid '{kid}'")));
            }

            if jwk.key_use.as_deref() == Some("enc") {
                tracing::debug!(target: "authn.keys", kid = %kid, "Skipping encryption key");
                continue;
            }

            if let Some(key) = build_key(kid.clone(), &jwk)? {
                keys.insert(kid, key);
            }
        }

        if keys.is_empty() {
            return Err(FetchError::ParseError(
                "JWKS contains no usable signing keys".to_string(),
            ));
        }

        Ok(Self { keys })
    }

    /// Look up a key by ID.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.get(kid)
    }

    /// All keys, ordered by key ID.
    pub fn keys(&self) -> impl Iterator<Item = &VerificationKey> {
        self.keys.values()
    }

    /// Number of usable keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Convert one JWK into a verification key.
///
/// `Ok(None)` means the key is well-formed but of a type we do not verify.
fn build_key(kid: String, jwk: &Jwk) -> Result<Option<VerificationKey>, FetchError> {
    let declared = match jwk.alg.as_deref() {
        Some(alg) => match Algorithm::from_str(alg) {
            Ok(alg) => Some(alg),
            Err(_) => {
                tracing::debug!(target: "authn.keys", kid = %kid, alg = %alg, "Skipping key with unsupported alg");
                return Ok(None);
            }
        },
        None => None,
    };

    let malformed =
        |what: &str| FetchError::ParseError(format!("key '{kid}' has malformed {what}"));

    let (algorithms, decoding_key) = match jwk.kty.as_str() {
        "OKP" => {
            if jwk.crv.as_deref().is_some_and(|crv| crv != "Ed25519") {
                return Ok(None);
            }
            if declared.is_some_and(|alg| alg != Algorithm::EdDSA) {
                return Ok(None);
            }
            let x = jwk.x.as_deref().ok_or_else(|| malformed("x"))?;
            let public_key = decode_ed25519_public_key_jwk(x).map_err(|_| malformed("x"))?;
            if public_key.len() != 32 {
                return Err(malformed("x"));
            }
            (vec![Algorithm::EdDSA], DecodingKey::from_ed_der(&public_key))
        }
        "RSA" => {
            let algorithms = match declared {
                Some(alg) if RSA_ALGORITHMS.contains(&alg) => vec![alg],
                Some(_) => return Ok(None),
                None => RSA_ALGORITHMS.to_vec(),
            };
            let n = jwk.n.as_deref().ok_or_else(|| malformed("n"))?;
            let e = jwk.e.as_deref().ok_or_else(|| malformed("e"))?;
            let key = DecodingKey::from_rsa_components(n, e).map_err(|_| malformed("n/e"))?;
            (algorithms, key)
        }
        "EC" => {
            let alg = match jwk.crv.as_deref() {
                Some("P-256") => Algorithm::ES256,
                Some("P-384") => Algorithm::ES384,
                _ => return Ok(None),
            };
            if declared.is_some_and(|declared| declared != alg) {
                return Ok(None);
            }
            let x = jwk.x.as_deref().ok_or_else(|| malformed("x"))?;
            let y = jwk.y.as_deref().ok_or_else(|| malformed("y"))?;
            let key = DecodingKey::from_ec_components(x, y).map_err(|_| malformed("x/y"))?;
            (vec![alg], key)
        }
        other => {
            tracing::debug!(target: "authn.keys", kid = %kid, kty = %other, "Skipping unsupported key type");
            return Ok(None);
        }
    };

    Ok(Some(VerificationKey {
        kid,
        algorithms,
        decoding_key,
    }))
}
