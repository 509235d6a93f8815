use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Startup configuration problems. Any of these aborts the server.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("OAUTH_GATEWAY_SECRET is not set or empty")]
    MissingSecret,

    #[error("Invalid signing secret: {0}")]
    InvalidSecret(String),

    #[error("Invalid bind address '{0}'")]
    InvalidBind(String),

    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Credential verifier setup failed: {0}")]
    Verifier(String),
}

/// Token endpoint failures (RFC 6749 §5.2).
///
/// The payload strings are diagnostic detail for the server log. They never
/// reach the client: the response body only carries the error code and a
/// fixed description.
#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    #[error("invalid_request: {0}")]
    InvalidRequest(&'static str),

    #[error("invalid_client: {0}")]
    InvalidClient(String),

    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    #[error("invalid_scope: {0}")]
    InvalidScope(String),

    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),
}

impl GrantError {
    pub fn error_code(&self) -> &'static str {
        match self {
            GrantError::InvalidRequest(_) => "invalid_request",
            GrantError::InvalidClient(_) => "invalid_client",
            GrantError::InvalidGrant(_) => "invalid_grant",
            GrantError::InvalidScope(_) => "invalid_scope",
            GrantError::UnauthorizedClient(_) => "unauthorized_client",
            GrantError::UnsupportedGrantType(_) => "unsupported_grant_type",
        }
    }

    fn public_description(&self) -> &'static str {
        match self {
            GrantError::InvalidRequest(msg) => *msg,
            GrantError::InvalidClient(_) => "Client authentication failed",
            GrantError::InvalidGrant(_) => "The provided grant is invalid or expired",
            GrantError::InvalidScope(_) => "The requested scope exceeds the original grant",
            GrantError::UnauthorizedClient(_) => "Client is not allowed to use this grant type",
            GrantError::UnsupportedGrantType(_) => {
                "Only authorization_code and refresh_token are supported"
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GrantError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for GrantError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.error_code(),
            "error_description": self.public_description(),
        }));
        let mut response = (self.status(), body).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if matches!(self, GrantError::InvalidClient(_)) {
            headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"oauth\""),
            );
        }
        response
    }
}

/// Reasons a bearer token fails verification. Logged, never returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(&'static str),

    #[error("signature mismatch")]
    BadSignature,

    #[error("token expired at {0}")]
    Expired(i64),
}

/// Outcome of an external credential check that did not produce an identity.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credentials rejected")]
    Rejected,

    #[error("identity verifier unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("dynamic client registration is disabled")]
    Disabled,

    #[error("{0}")]
    InvalidMetadata(String),
}

impl IntoResponse for RegistrationError {
    fn into_response(self) -> Response {
        match self {
            RegistrationError::Disabled => StatusCode::NOT_FOUND.into_response(),
            RegistrationError::InvalidMetadata(description) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "invalid_client_metadata",
                    "error_description": description,
                })),
            )
                .into_response(),
        }
    }
}

/// Top-level error for the server binary.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
