//! Stateless access tokens: `base64url(header).base64url(payload).base64url(tag)`
//! where the tag is HMAC-SHA256 over the first two segments.
//!
//! Validity depends only on the tag and the `exp` claim, so verification
//! never touches a store and can run fully in parallel.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::types::AccessClaims;
use crate::error::{ConfigError, TokenError};

type HmacSha256 = Hmac<Sha256>;

pub const ACCESS_TOKEN_TTL_SECS: i64 = 60 * 60; // 1 hour

const ALGORITHM: &str = "HS256";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Process-wide signing secret. Cloning shares the pre-keyed MAC state.
#[derive(Clone)]
pub struct SigningKey {
    mac: HmacSha256,
}

impl SigningKey {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, ConfigError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| ConfigError::InvalidSecret(e.to_string()))?;
        Ok(Self { mac })
    }

    fn tag(&self, signing_input: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(signing_input.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

#[derive(Debug, Clone)]
pub struct TokenCodec {
    key: SigningKey,
}

impl TokenCodec {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Sign a token for `subject`/`client_id` valid for `ttl_secs` from now.
    pub fn sign(&self, subject: &str, client_id: &str, scopes: &[String], ttl_secs: i64) -> String {
        let now = Utc::now().timestamp();
        self.sign_claims(&AccessClaims {
            sub: subject.to_string(),
            client_id: client_id.to_string(),
            scopes: scopes.to_vec(),
            iat: now,
            exp: now + ttl_secs,
        })
    }

    /// Sign fully-formed claims (`iat`/`exp` already set).
    pub fn sign_claims(&self, claims: &AccessClaims) -> String {
        let header = Header {
            alg: ALGORITHM.into(),
            typ: "JWT".into(),
        };
        // Serializing plain structs of strings and integers cannot fail.
        let header_json = serde_json::to_vec(&header).unwrap_or_default();
        let payload_json = serde_json::to_vec(claims).unwrap_or_default();

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(payload_json)
        );
        let tag = self.key.tag(&signing_input);
        format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(tag))
    }

    pub fn verify(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify against an explicit clock (unix seconds).
    pub fn verify_at(&self, token: &str, now: i64) -> Result<AccessClaims, TokenError> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(tag_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::Malformed("expected three segments"));
        };

        let header_json = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| TokenError::Malformed("header is not base64url"))?;
        let header: Header = serde_json::from_slice(&header_json)
            .map_err(|_| TokenError::Malformed("header is not JSON"))?;
        if header.alg != ALGORITHM {
            return Err(TokenError::Malformed("unsupported algorithm"));
        }

        let presented = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| TokenError::Malformed("signature is not base64url"))?;
        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
        let expected = self.key.tag(signing_input);
        if !bool::from(expected.as_slice().ct_eq(presented.as_slice())) {
            return Err(TokenError::BadSignature);
        }

        let payload_json = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed("payload is not base64url"))?;
        let claims: AccessClaims = serde_json::from_slice(&payload_json)
            .map_err(|_| TokenError::Malformed("payload is not valid claims"))?;

        if now >= claims.exp {
            return Err(TokenError::Expired(claims.exp));
        }
        Ok(claims)
    }
}
