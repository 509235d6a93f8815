//! External identity verification.
//!
//! The authorization endpoint never checks passwords itself. It hands the
//! submitted username/password to a [`CredentialVerifier`] and only learns
//! the resulting subject id (or that the attempt failed).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{ConfigError, CredentialError};

/// Identity established by a successful credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub subject: String,
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, username: &str, password: &str)
        -> Result<VerifiedIdentity, CredentialError>;
}

// ---------------------------------------------------------------------------
// Static users (username → SHA-256 of password)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct StaticCredentialVerifier {
    users: HashMap<String, String>,
}

impl StaticCredentialVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        self.users.insert(username.to_string(), password_digest(password));
        self
    }

    /// Load a JSON object of `username → sha256 hex digest`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let users: HashMap<String, String> =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        let users = users
            .into_iter()
            .map(|(name, digest)| (name, digest.to_ascii_lowercase()))
            .collect();
        Ok(Self { users })
    }
}

#[async_trait]
impl CredentialVerifier for StaticCredentialVerifier {
    async fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> Result<VerifiedIdentity, CredentialError> {
        // Hash even for unknown users so both paths cost the same
        let presented = password_digest(password);
        let matched = self
            .users
            .get(username)
            .map(|expected| bool::from(expected.as_bytes().ct_eq(presented.as_bytes())))
            .unwrap_or(false);

        if matched {
            Ok(VerifiedIdentity {
                subject: username.to_string(),
            })
        } else {
            Err(CredentialError::Rejected)
        }
    }
}

fn password_digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Remote identity store over HTTP
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct VerifyRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    subject: String,
}

/// Delegates to an HTTP endpoint of the host application.
///
/// `POST {endpoint}` with `{"username","password"}`. 2xx with
/// `{"subject": ".."}` is success, 401/403 is a rejection, anything else
/// (including timeouts) means the verifier is unavailable.
pub struct HttpCredentialVerifier {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpCredentialVerifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)
            .map_err(|e| ConfigError::Verifier(format!("invalid verifier URL {}: {}", endpoint, e)))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Verifier(e.to_string()))?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl CredentialVerifier for HttpCredentialVerifier {
    async fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> Result<VerifiedIdentity, CredentialError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&VerifyRequest { username, password })
            .send()
            .await
            .map_err(|e| CredentialError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CredentialError::Rejected);
        }
        if !status.is_success() {
            return Err(CredentialError::Unavailable(format!(
                "verifier returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Unavailable(format!("bad verifier response: {}", e)))?;
        if body.subject.is_empty() {
            return Err(CredentialError::Unavailable("verifier returned empty subject".into()));
        }
        Ok(VerifiedIdentity {
            subject: body.subject,
        })
    }
}
