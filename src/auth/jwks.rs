//! JSON Web Key Sets
//!
//! Parses an issuer's published JWKS into prepared [`SigningKey`]s.
//!
//! Only asymmetric signature keys are kept: RSA (`RS*`, `PS*`), EC P-256 /
//! P-384 (`ES256`, `ES384`) and Ed25519 (`EdDSA`). Keys marked `use: enc`,
//! symmetric keys and keys that fail to parse are skipped with a warning.

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors converting a JWK into a signing key
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwkError {
    #[error("Missing JWK parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("Unsupported curve: {0}")]
    UnsupportedCurve(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

/// A single JSON Web Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA", "EC", "OKP")
    pub kty: String,

    /// Key ID
    #[serde(default)]
    pub kid: Option<String>,

    /// Intended use ("sig" for signature)
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// Algorithm (e.g., "RS256", "ES256")
    #[serde(default)]
    pub alg: Option<String>,

    // RSA parameters
    /// RSA modulus (base64url encoded)
    #[serde(default)]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded)
    #[serde(default)]
    pub e: Option<String>,

    // EC / OKP parameters
    /// Curve (e.g., "P-256", "Ed25519")
    #[serde(default)]
    pub crv: Option<String>,

    /// x coordinate (base64url encoded)
    #[serde(default)]
    pub x: Option<String>,

    /// y coordinate (base64url encoded)
    #[serde(default)]
    pub y: Option<String>,
}

/// JSON Web Key Set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    #[serde(default)]
    pub keys: Vec<Jwk>,
}

/// Key family, which bounds the algorithms a key may verify
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    EcP256,
    EcP384,
    Ed25519,
}

impl KeyFamily {
    /// Whether a key of this family can verify `alg`
    pub fn fits(&self, alg: Algorithm) -> bool {
        matches!(
            (self, alg),
            (
                Self::Rsa,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ) | (Self::EcP256, Algorithm::ES256)
                | (Self::EcP384, Algorithm::ES384)
                | (Self::Ed25519, Algorithm::EdDSA)
        )
    }
}

/// Parse a JOSE algorithm name, refusing HMAC
pub fn parse_algorithm(name: &str) -> Option<Algorithm> {
    match name {
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "PS256" => Some(Algorithm::PS256),
        "PS384" => Some(Algorithm::PS384),
        "PS512" => Some(Algorithm::PS512),
        "ES256" => Some(Algorithm::ES256),
        "ES384" => Some(Algorithm::ES384),
        "EdDSA" => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Whether `alg` is a shared-secret algorithm
pub fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// A prepared public key from an issuer's key set
#[derive(Clone)]
pub struct SigningKey {
    kid: Option<String>,
    algorithm: Option<Algorithm>,
    family: KeyFamily,
    key: DecodingKey,
}

impl SigningKey {
    /// Convert a JWK into a verification key
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, JwkError> {
        let algorithm = match jwk.alg.as_deref() {
            Some(name) => Some(
                parse_algorithm(name)
                    .ok_or_else(|| JwkError::UnsupportedAlgorithm(name.to_string()))?,
            ),
            None => None,
        };

        let (family, key) = match jwk.kty.as_str() {
            "RSA" => {
                let n = jwk.n.as_ref().ok_or(JwkError::MissingParameter("n"))?;
                let e = jwk.e.as_ref().ok_or(JwkError::MissingParameter("e"))?;
                let key = DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| JwkError::InvalidKey(format!("RSA: {}", e)))?;
                (KeyFamily::Rsa, key)
            }
            "EC" => {
                let family = match jwk.crv.as_deref() {
                    Some("P-256") => KeyFamily::EcP256,
                    Some("P-384") => KeyFamily::EcP384,
                    Some(other) => return Err(JwkError::UnsupportedCurve(other.to_string())),
                    None => return Err(JwkError::MissingParameter("crv")),
                };
                let x = jwk.x.as_ref().ok_or(JwkError::MissingParameter("x"))?;
                let y = jwk.y.as_ref().ok_or(JwkError::MissingParameter("y"))?;
                // from_ec_components expects base64url-encoded strings directly
                let key = DecodingKey::from_ec_components(x, y)
                    .map_err(|e| JwkError::InvalidKey(format!("EC: {}", e)))?;
                (family, key)
            }
            "OKP" => {
                match jwk.crv.as_deref() {
                    Some("Ed25519") => {}
                    Some(other) => return Err(JwkError::UnsupportedCurve(other.to_string())),
                    None => return Err(JwkError::MissingParameter("crv")),
                }
                let x = jwk.x.as_ref().ok_or(JwkError::MissingParameter("x"))?;
                let key = DecodingKey::from_ed_components(x)
                    .map_err(|e| JwkError::InvalidKey(format!("OKP: {}", e)))?;
                (KeyFamily::Ed25519, key)
            }
            other => return Err(JwkError::UnsupportedKeyType(other.to_string())),
        };

        if let Some(alg) = algorithm {
            if !family.fits(alg) {
                return Err(JwkError::UnsupportedAlgorithm(format!(
                    "{:?} for {} key",
                    alg, jwk.kty
                )));
            }
        }

        Ok(Self {
            kid: jwk.kid.clone(),
            algorithm,
            family,
            key,
        })
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Algorithm pinned by the JWK, if any
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// Whether this key may verify a token signed with `alg`
    pub fn supports(&self, alg: Algorithm) -> bool {
        self.family.fits(alg) && self.algorithm.map_or(true, |pinned| pinned == alg)
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

/// The usable signature keys of one issuer
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<SigningKey>,
}

impl KeySet {
    /// Build from a JWKS document, skipping keys that cannot verify signatures
    pub fn from_jwks(jwks: &Jwks) -> Self {
        let mut keys = Vec::with_capacity(jwks.keys.len());

        for jwk in &jwks.keys {
            if jwk.key_use.as_deref() == Some("enc") {
                debug!(kid = ?jwk.kid, "Skipping encryption key");
                continue;
            }

            match SigningKey::from_jwk(jwk) {
                Ok(key) => keys.push(key),
                Err(e) => warn!(kid = ?jwk.kid, kty = %jwk.kty, "Skipping JWK: {}", e),
            }
        }

        Self { keys }
    }

    /// Find the key that may verify a token with the given header values
    ///
    /// With a `kid`, only that key is considered. Without one, the key must
    /// be the only one able to verify `alg`; ambiguity is a miss.
    pub fn find(&self, kid: Option<&str>, alg: Algorithm) -> Option<&SigningKey> {
        match kid {
            Some(kid) => self
                .keys
                .iter()
                .find(|k| k.kid() == Some(kid))
                .filter(|k| k.supports(alg)),
            None => {
                let mut candidates = self.keys.iter().filter(|k| k.supports(alg));
                match (candidates.next(), candidates.next()) {
                    (Some(only), None) => Some(only),
                    _ => None,
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SigningKey> {
        self.keys.iter()
    }
}
