//! Cryptographic fixtures for testing
//!
//! Provides signing keys for every algorithm family the verifier accepts,
//! together with their JWK representations:
//!
//! - Ed25519 keys, deterministic from a seed
//! - P-256 ECDSA keys, freshly generated
//! - One fixed 2048-bit RSA key (ring cannot generate RSA keys)

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, Ed25519KeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// A signing key with its key id.
#[derive(Debug, Clone)]
pub struct TestKey {
    pub kid: String,
    /// `EdDSA`, `ES256` or `RS256`
    pub algorithm: Algorithm,
    /// Raw Ed25519 key, uncompressed EC point, or RSA modulus
    pub public_key: Vec<u8>,
    /// PKCS#8 DER for Ed25519 and EC, PKCS#1 DER for RSA
    pub private_key_der: Vec<u8>,
}

impl TestKey {
    /// Use a different key id for the same key material.
    pub fn with_kid(mut self, kid: &str) -> Self {
        self.kid = kid.to_string();
        self
    }

    /// The public key as a JWK.
    pub fn jwk(&self) -> Value {
        match self.algorithm {
            Algorithm::ES256 => {
                // 0x04 || x || y
                let (x, y) = self.public_key[1..].split_at(32);
                json!({
                    "kty": "EC",
                    "crv": "P-256",
                    "x": URL_SAFE_NO_PAD.encode(x),
                    "y": URL_SAFE_NO_PAD.encode(y),
                    "kid": self.kid,
                    "alg": "ES256",
                    "use": "sig",
                })
            }
            Algorithm::RS256 => json!({
                "kty": "RSA",
                "n": URL_SAFE_NO_PAD.encode(&self.public_key),
                "e": RSA_EXPONENT,
                "kid": self.kid,
                "alg": "RS256",
                "use": "sig",
            }),
            _ => json!({
                "kty": "OKP",
                "crv": "Ed25519",
                "x": URL_SAFE_NO_PAD.encode(&self.public_key),
                "kid": self.kid,
                "alg": "EdDSA",
                "use": "sig",
            }),
        }
    }

    /// Key for signing test tokens.
    pub fn encoding_key(&self) -> EncodingKey {
        match self.algorithm {
            Algorithm::ES256 => EncodingKey::from_ec_der(&self.private_key_der),
            Algorithm::RS256 => EncodingKey::from_rsa_der(&self.private_key_der),
            _ => EncodingKey::from_ed_der(&self.private_key_der),
        }
    }
}

/// Generate a deterministic Ed25519 signing key for testing.
///
/// The same seed always produces the same keypair. The key id is
/// `test-key-<seed>`.
///
/// # Example
/// ```rust,ignore
/// let key = test_signing_key(1)?;
/// assert_eq!(key.public_key, test_signing_key(1)?.public_key);
/// ```
pub fn test_signing_key(seed: u8) -> Result<TestKey, FixtureError> {
    // Create deterministic 32-byte seed from input
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }

    let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e)))?;

    Ok(TestKey {
        kid: format!("test-key-{seed}"),
        algorithm: Algorithm::EdDSA,
        public_key: key_pair.public_key().as_ref().to_vec(),
        private_key_der: build_pkcs8_from_seed(&seed_bytes),
    })
}

/// Generate a fresh P-256 key (`ES256`) with key id `test-es256-key`.
pub fn test_es256_key() -> Result<TestKey, FixtureError> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate EC keypair: {:?}", e)))?;
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
        .map_err(|e| FixtureError::Crypto(format!("Failed to parse EC keypair: {:?}", e)))?;

    Ok(TestKey {
        kid: "test-es256-key".to_string(),
        algorithm: Algorithm::ES256,
        public_key: key_pair.public_key().as_ref().to_vec(),
        private_key_der: pkcs8.as_ref().to_vec(),
    })
}

/// The fixed RSA key (`RS256`) with key id `test-rs256-key`.
pub fn test_rs256_key() -> Result<TestKey, FixtureError> {
    let private_key_der = STANDARD
        .decode(RSA_PRIVATE_KEY_DER.concat())
        .map_err(|e| FixtureError::Crypto(format!("Invalid RSA fixture: {e}")))?;
    let public_key = URL_SAFE_NO_PAD
        .decode(RSA_MODULUS.concat())
        .map_err(|e| FixtureError::Crypto(format!("Invalid RSA fixture: {e}")))?;

    Ok(TestKey {
        kid: "test-rs256-key".to_string(),
        algorithm: Algorithm::RS256,
        public_key,
        private_key_der,
    })
}

/// Build PKCS#8 v1 document from Ed25519 seed
///
/// This is a test-only utility. Production code must use ring::rand::SystemRandom.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    // SEQUENCE { version INTEGER 0, AlgorithmIdentifier, OCTET STRING { OCTET STRING seed } }
    let mut pkcs8 = Vec::with_capacity(48);

    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // OID 1.3.101.112 (Ed25519)
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}

/// A JWKS document holding the given keys.
pub fn jwks_json(keys: &[&TestKey]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() })
}

const RSA_EXPONENT: &str = "AQAB";

/// Base64url modulus of the fixed RSA key.
const RSA_MODULUS: [&str; 5] = [
    "2Wtz3QNBvr6IP74cqPyxDaEclCxGN0t_YDDjMRfQ4q7_Kq1SGcleCmCHCu6dLCJCL1mx2luQSOJT",
    "_GLdo4yN5HScnFy4TuwKuUOEpngnUOLfQBUKtNrtNqCxzb7n8FepgjV5N-ecLvtcZojdV-AIJfvp",
    "tXQaizxQOWaq-8p7U2QLKAhfCz1XKPG6XXxrmTuCmzuH8FIBwlIRPf0wDnYSt2tp1KPyHDN3pNMn",
    "rOx2HLVq0m2InxwYHhJd5gVmnP4n5ERTSflJYh61OI0czYRukjhJxYg8Es6HslkQD9okEaoN3uce",
    "udMfhW8pWm2Qjc_NFvfzGs3gRL543pohhmzoqQ",
];

/// Base64 PKCS#1 DER of the fixed RSA key.
const RSA_PRIVATE_KEY_DER: [&str; 21] = [
    "MIIEogIBAAKCAQEA2Wtz3QNBvr6IP74cqPyxDaEclCxGN0t/YDDjMRfQ4q7/Kq1SGcleCmCHCu6d",
    "LCJCL1mx2luQSOJT/GLdo4yN5HScnFy4TuwKuUOEpngnUOLfQBUKtNrtNqCxzb7n8FepgjV5N+ec",
    "LvtcZojdV+AIJfvptXQaizxQOWaq+8p7U2QLKAhfCz1XKPG6XXxrmTuCmzuH8FIBwlIRPf0wDnYS",
    "t2tp1KPyHDN3pNMnrOx2HLVq0m2InxwYHhJd5gVmnP4n5ERTSflJYh61OI0czYRukjhJxYg8Es6H",
    "slkQD9okEaoN3uceudMfhW8pWm2Qjc/NFvfzGs3gRL543pohhmzoqQIDAQABAoIBABzAGQrrjJTW",
    "2KkHMH6HJbmN6bvNS/6xYNddN5nNEq37Ippn33CyAFnCcHEZYxbMM/DTfVGI5KBCr4TzJOhk5HmG",
    "kxQZLbUgAP4FJ+QkhNxtF8T/U1JdldswrjptCXoueWeSvyQNoElVK1+SryRY53LwaDP6tazeTaR9",
    "h1Qy7xJ0bJHnaZ4CWKYCZiGcTNyQFFmN8HCZhf032Oo7155tu6UeCryIwyyIvz5/ofFrtV2Ty7sH",
    "V5VTdlI0wljgqEc1Gij3M9Kzku8Y09Ip9rLSDfWG7OhBI1ArMqNxkyV5848urcU6+7Wbm9iMk4Ja",
    "qx967wbsA49cpUPF0dnMplJyJ4UCgYEA9nAOgqaDAZV0ijrSXM33Z0i675vhnSn8DXPY+ElWGuqs",
    "8nIdTBhRlxX/alGv/EpdQBgOyNOq4Uvoj/rAH2Xxmal+oUCyaZjJlTO4O4I2ImSE4ZkKhy/1SqcI",
    "FUIhYc4M5XzJ9Wpx0OsIa4N+2jkQxy8W/j3RRfPJeeYTuPEpfZ0CgYEA4dsmscbxESicwS7uyHxa",
    "G/BLu8x30dGrnC0T5N+ECDp24XmgThxI3Bj3dIJsfetUk3tK/bhX5sj5WZoJKtTJxRNka2MWqTxr",
    "aG+ndYvjJ9Hk7rcbCLQwpTC1H+d4YCiBB6BPXb2dEU2fQcvZikpCApRU08R4TgCbJZNuofnp730C",
    "gYAP8Y/+w+cV4yV3C/cwKeMnu3zco6klEeJMvIH9DkGT3Dr0NI3QroIY1EOCDWblW6pMy0GpnIgh",
    "q1eQeRiU73OCDYUzyYvBaTEhhgcVUodOElLGhbA4rtGf0s6jEXQ3b61F65zlU82pRot06Tz7wVVk",
    "jZdfO4Celfci+8+q129nwQKBgEnV7Dt4Lz0Nytk476UpSggSMaAOgylb4z9mWTecfrx16IFj0q1W",
    "f9c8bkFvlepAceDZELYLeuke0K2jNtYCxIeiBFU7CqB++RomTleWSMeuzangwHzC85g9aSkp8ed1",
    "tmD43pllsKCEgMjwzIhyKExRk727YB0YA6BwJ13apsi9AoGAYJnxaUZCazLFwOS16KgdtiHmqFK2",
    "ZDR/V2d1lOsRYCyTs7EKh9VtkrNkLcOCVDP/t9cFBUzXMMFeMzv22CbSNy4yoLGsBPnOfcoo1Hza",
    "hM7R0jDc9MBmZiPEaIuW0RcPObKnZI41iZrIrDjUbBw+S5z+EyXyrJNTU+BXmxIPvK8=",
];
