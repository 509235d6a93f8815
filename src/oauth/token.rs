use axum::extract::Extension;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::types::{parse_scope, OAuthClient, TokenRequest, TokenResponse};
use super::types::{GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN};
use super::OAuthState;
use crate::error::GrantError;

/// OAuth 2.1 Token Endpoint.
///
/// `POST /oauth/token` (application/x-www-form-urlencoded)
///
/// Supports two grant types:
/// - `authorization_code`: exchange auth code for tokens (with PKCE)
/// - `refresh_token`: rotate refresh token for new tokens
///
/// Every failure is logged with full detail; the response only carries the
/// generic OAuth error code.
pub async fn token_exchange(
    Extension(state): Extension<OAuthState>,
    headers: HeaderMap,
    Form(req): Form<TokenRequest>,
) -> Response {
    let grant_type = req.grant_type.clone();
    match handle(&state, &headers, req) {
        Ok(tokens) => no_store(Json(tokens)),
        Err(e) => {
            log::warn!("AUDIT DENIED token grant={} error={}", grant_type, e);
            e.into_response()
        }
    }
}

fn handle(
    state: &OAuthState,
    headers: &HeaderMap,
    req: TokenRequest,
) -> Result<TokenResponse, GrantError> {
    if req.grant_type.is_empty() {
        return Err(GrantError::InvalidRequest("Missing 'grant_type'"));
    }
    if !matches!(
        req.grant_type.as_str(),
        GRANT_AUTHORIZATION_CODE | GRANT_REFRESH_TOKEN
    ) {
        return Err(GrantError::UnsupportedGrantType(req.grant_type));
    }

    let client = authenticate_client(state, headers, &req)?;
    if !client.allows_grant(&req.grant_type) {
        return Err(GrantError::UnauthorizedClient(format!(
            "client {} not registered for {}",
            client.client_id, req.grant_type
        )));
    }

    if req.grant_type == GRANT_AUTHORIZATION_CODE {
        handle_authorization_code(state, &client, req)
    } else {
        handle_refresh_token(state, &client, req)
    }
}

fn handle_authorization_code(
    state: &OAuthState,
    client: &OAuthClient,
    req: TokenRequest,
) -> Result<TokenResponse, GrantError> {
    let code = req.code.as_deref().ok_or(GrantError::InvalidRequest("Missing 'code'"))?;
    let code_verifier = req
        .code_verifier
        .as_deref()
        .ok_or(GrantError::InvalidRequest("Missing 'code_verifier'"))?;

    // PKCE happens at this boundary; the grant logic only stores the challenge
    let challenge = state
        .tokens
        .code_challenge(code)
        .ok_or_else(|| GrantError::InvalidGrant(format!("code unknown to client {}", client.client_id)))?;
    if !state.pkce.verify(code_verifier, &challenge) {
        return Err(GrantError::InvalidGrant(format!(
            "PKCE verification failed for client {}",
            client.client_id
        )));
    }

    let tokens = state
        .tokens
        .exchange_code(client, code, req.redirect_uri.as_deref())?;

    log::info!(
        "OAuth token issued: client={} grant=authorization_code",
        client.client_id
    );
    Ok(tokens)
}

fn handle_refresh_token(
    state: &OAuthState,
    client: &OAuthClient,
    req: TokenRequest,
) -> Result<TokenResponse, GrantError> {
    let refresh_token = req
        .refresh_token
        .as_deref()
        .ok_or(GrantError::InvalidRequest("Missing 'refresh_token'"))?;
    let scopes = req.scope.as_deref().map(parse_scope);

    let tokens = state.tokens.refresh(client, refresh_token, scopes)?;

    log::info!(
        "OAuth token refreshed: client={} grant=refresh_token",
        client.client_id
    );
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Client authentication
// ---------------------------------------------------------------------------

/// Resolve the calling client from `client_secret_basic` or the form body and
/// check its secret when it is confidential.
fn authenticate_client(
    state: &OAuthState,
    headers: &HeaderMap,
    req: &TokenRequest,
) -> Result<OAuthClient, GrantError> {
    let basic = basic_credentials(headers);
    let (client_id, secret) = match (&basic, req.client_id.as_deref()) {
        (Some((id, secret)), form_id) => {
            if form_id.is_some_and(|f| f != id.as_str()) {
                return Err(GrantError::InvalidRequest("Conflicting client identification"));
            }
            (id.as_str(), Some(secret.as_str()))
        }
        (None, Some(id)) => (id, req.client_secret.as_deref()),
        (None, None) => return Err(GrantError::InvalidClient("no client_id presented".into())),
    };

    let client = state
        .clients
        .get_client(client_id)
        .ok_or_else(|| GrantError::InvalidClient(format!("unknown client {}", client_id)))?;

    if !state.clients.authenticate(&client, secret) {
        return Err(GrantError::InvalidClient(format!(
            "secret check failed for client {}",
            client_id
        )));
    }
    Ok(client)
}

/// `Authorization: Basic base64(urlencode(id):urlencode(secret))` (RFC 6749 §2.3.1).
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    if value.len() <= 6 || !value[..6].eq_ignore_ascii_case("basic ") {
        return None;
    }
    let decoded = STANDARD.decode(value[6..].trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((
        urlencoding::decode(id).ok()?.into_owned(),
        urlencoding::decode(secret).ok()?.into_owned(),
    ))
}

fn no_store(body: impl IntoResponse) -> Response {
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}
