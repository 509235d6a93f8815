//! Bearer token validation for protected routes (RFC 6750 §2.1).
//!
//! Per RFC 7235 §2.1, the auth-scheme ("Bearer") comparison MUST be
//! case-insensitive.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::codec::TokenCodec;
use super::types::AccessClaims;
use super::OAuthState;
use crate::error::TokenError;

/// Identity behind a verified bearer token, inserted into request extensions
/// for downstream handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedSubject {
    pub subject: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl AuthenticatedSubject {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

impl From<AccessClaims> for AuthenticatedSubject {
    fn from(claims: AccessClaims) -> Self {
        Self {
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or_default(),
            subject: claims.sub,
            client_id: claims.client_id,
            scopes: claims.scopes,
        }
    }
}

/// Result of validating a Bearer token from the Authorization header.
#[derive(Debug)]
pub enum TokenValidation {
    /// Signature checks out and the token has not expired.
    Valid(AuthenticatedSubject),
    /// A Bearer token was provided but is malformed, tampered or expired.
    Invalid(TokenError),
    /// No Authorization: Bearer header was present.
    Missing,
}

/// Extract and validate a Bearer token from HTTP headers.
pub fn validate_bearer(headers: &HeaderMap, codec: &TokenCodec) -> TokenValidation {
    let Some(token) = bearer_token(headers) else {
        return TokenValidation::Missing;
    };
    match codec.verify(token) {
        Ok(claims) => TokenValidation::Valid(claims.into()),
        Err(e) => TokenValidation::Invalid(e),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() > 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
        .filter(|t| !t.is_empty())
}

/// Gate for protected routes.
///
/// Missing or invalid tokens get a bare 401 with a `WWW-Authenticate: Bearer`
/// challenge pointing at the protected resource metadata (RFC 9728 §5.1).
/// The cause of the failure is only logged.
pub async fn require_bearer(
    State(state): State<OAuthState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let subject = match validate_bearer(req.headers(), state.tokens.codec()) {
        TokenValidation::Valid(subject) => subject,
        TokenValidation::Invalid(e) => {
            log::warn!(
                "AUDIT DENIED method={} path={} reason=invalid_token detail={}",
                method,
                path,
                e
            );
            return challenge(&state, true);
        }
        TokenValidation::Missing => {
            log::info!(
                "AUDIT DENIED method={} path={} reason=missing_token",
                method,
                path
            );
            return challenge(&state, false);
        }
    };

    let subject_id = subject.subject.clone();
    let client_id = subject.client_id.clone();
    req.extensions_mut().insert(subject);

    let response = next.run(req).await;
    log::info!(
        "AUDIT subject={} client={} method={} path={} status={}",
        subject_id,
        client_id,
        method,
        path,
        response.status().as_u16()
    );
    response
}

fn challenge(state: &OAuthState, invalid_token: bool) -> Response {
    let metadata_url = format!("{}/.well-known/oauth-protected-resource", state.issuer);
    let value = if invalid_token {
        format!(
            "Bearer error=\"invalid_token\", resource_metadata=\"{}\"",
            metadata_url
        )
    } else {
        format!("Bearer resource_metadata=\"{}\"", metadata_url)
    };

    let mut response = StatusCode::UNAUTHORIZED.into_response();
    let header_value =
        HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("Bearer"));
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, header_value);
    response
}
