use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Client registration (RFC 7591)
// ---------------------------------------------------------------------------

/// Expiry of a client secret.
///
/// RFC 7591 encodes "never" as `0` on the wire, which is easy to misread as an
/// already-expired timestamp. Internally the two cases are distinct variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretExpiry {
    #[default]
    Never,
    At(DateTime<Utc>),
}

impl SecretExpiry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            SecretExpiry::Never => false,
            SecretExpiry::At(expires_at) => now >= *expires_at,
        }
    }

    /// `client_secret_expires_at` as sent in registration responses.
    pub fn wire_value(&self) -> i64 {
        match self {
            SecretExpiry::Never => 0,
            SecretExpiry::At(expires_at) => expires_at.timestamp(),
        }
    }
}

/// A registered OAuth client (e.g. "Claude", "Cursor"). Immutable once
/// registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_name: String,
    /// SHA-256 hex digest of the client secret. `None` for public clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_hash: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub secret_expires_at: SecretExpiry,
}

impl OAuthClient {
    pub fn is_confidential(&self) -> bool {
        self.token_endpoint_auth_method != AUTH_METHOD_NONE
    }

    pub fn allows_grant(&self, grant_type: &str) -> bool {
        self.grant_types.iter().any(|g| g == grant_type)
    }
}

pub const AUTH_METHOD_NONE: &str = "none";
pub const AUTH_METHOD_SECRET_POST: &str = "client_secret_post";
pub const AUTH_METHOD_SECRET_BASIC: &str = "client_secret_basic";

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// Inbound registration request body.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationRequest {
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,
    #[serde(default = "default_auth_method")]
    pub token_endpoint_auth_method: String,
}

fn default_client_name() -> String {
    "MCP Client".into()
}

pub(crate) fn default_grant_types() -> Vec<String> {
    vec![GRANT_AUTHORIZATION_CODE.into(), GRANT_REFRESH_TOKEN.into()]
}

pub(crate) fn default_response_types() -> Vec<String> {
    vec!["code".into()]
}

pub(crate) fn default_auth_method() -> String {
    AUTH_METHOD_NONE.into()
}

/// Registration response (mirrors request + server-assigned fields).
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub client_id: String,
    pub client_id_issued_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<i64>,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
}

/// Entry of the static client seed file. The secret is given in plain text
/// and hashed on load.
#[derive(Debug, Deserialize)]
pub struct ClientSeed {
    pub client_id: String,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,
    #[serde(default = "default_auth_method")]
    pub token_endpoint_auth_method: String,
    #[serde(default)]
    pub secret_expires_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Authorization code (short-lived, single-use)
// ---------------------------------------------------------------------------

/// What the authorization endpoint binds into a freshly minted code.
#[derive(Debug, Clone)]
pub struct NewAuthorizationCode {
    pub code_challenge: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub subject: String,
    pub state: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub code: String,
    pub code_challenge: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub subject: String,
    pub state: Option<String>,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Opaque refresh token, rotated on every use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token: String,
    pub subject: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Signed access token payload. Nothing about access tokens is stored
/// server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

// ---------------------------------------------------------------------------
// Token endpoint request (application/x-www-form-urlencoded)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: String,
    // authorization_code fields
    pub code: Option<String>,
    pub code_verifier: Option<String>,
    pub redirect_uri: Option<String>,
    // refresh_token fields
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    // client authentication (client_secret_post)
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Token endpoint response.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub scope: String,
}

// ---------------------------------------------------------------------------
// Authorization endpoint
// ---------------------------------------------------------------------------

/// `GET /oauth/authorize` query parameters.
#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    #[serde(default = "default_response_type")]
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub code_challenge: String,
    #[serde(default)]
    pub code_challenge_method: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub scope: String,
}

fn default_response_type() -> String {
    "code".into()
}

/// `POST /oauth/authorize` login form submission.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub state: String,
    pub code_challenge: String,
    #[serde(default)]
    pub scope: String,
}

/// Split a space-delimited scope parameter (RFC 6749 §3.3).
pub fn parse_scope(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(String::from).collect()
}
