//! Bearer token parsing
//!
//! [`UnverifiedToken`] is the first of two passes over a JWT: it reads the
//! header and the `iss` claim without checking the signature, only to pick
//! which issuer's trust material to load. Nothing read here authorizes
//! anything. [`Claims`] is the second pass, produced by signature
//! verification.

use super::AuthError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{decode_header, Algorithm, Header};
use serde::{Deserialize, Deserializer, Serialize};

/// A token whose signature has not been checked yet
#[derive(Debug, Clone)]
pub struct UnverifiedToken {
    raw: String,
    header: Header,
    issuer: String,
}

/// Only the issuer is read from an unverified payload
#[derive(Deserialize)]
struct IssuerOnly {
    #[serde(default)]
    iss: Option<String>,
}

impl UnverifiedToken {
    /// Parse the header and the claimed issuer
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let raw = raw.trim();
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(AuthError::MalformedToken(
                "expected three non-empty segments".into(),
            ));
        }

        let header = decode_header(raw)
            .map_err(|e| AuthError::MalformedToken(format!("invalid header: {}", e)))?;

        let payload = URL_SAFE_NO_PAD
            .decode(segments[1].trim_end_matches('='))
            .map_err(|e| AuthError::MalformedToken(format!("invalid payload encoding: {}", e)))?;
        let claims: IssuerOnly = serde_json::from_slice(&payload)
            .map_err(|e| AuthError::MalformedToken(format!("invalid payload: {}", e)))?;

        let issuer = claims
            .iss
            .map(|iss| iss.trim().to_string())
            .filter(|iss| !iss.is_empty())
            .ok_or_else(|| AuthError::MalformedToken("missing issuer claim".into()))?;

        Ok(Self {
            raw: raw.to_string(),
            header,
            issuer,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn algorithm(&self) -> Algorithm {
        self.header.alg
    }

    pub fn key_id(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// The issuer the token claims; untrusted
    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

/// Claims of a token whose signature has been verified
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// `aud` may be a single string or an array
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub aud: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Space-separated OAuth2 scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(aud)) => vec![aud],
        Some(OneOrMany::Many(auds)) => auds,
        None => Vec::new(),
    })
}
