use axum::extract::{Extension, Query};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;

use super::clients::is_registered_redirect;
use super::types::{parse_scope, AuthorizeParams, LoginForm, NewAuthorizationCode, OAuthClient};
use super::OAuthState;
use crate::error::CredentialError;

/// Shown for every failed login, whatever the cause.
const LOGIN_FAILED: &str = "Invalid username or password.";

// ---------------------------------------------------------------------------
// GET /oauth/authorize
// ---------------------------------------------------------------------------

/// OAuth 2.1 Authorization Endpoint (Authorization Code + PKCE).
///
/// Validates the request and renders the login form. Problems with the
/// client or redirect URI are answered here with 400; we never redirect to a
/// URI that is not registered.
pub async fn authorize(
    Extension(state): Extension<OAuthState>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let client = match registered_client(&state, &params.client_id, &params.redirect_uri) {
        Ok(client) => client,
        Err(status) => return status.into_response(),
    };

    if params.response_type != "code" {
        return error_redirect(
            &params.redirect_uri,
            "unsupported_response_type",
            "Only 'code' is supported",
            &params.state,
        );
    }
    if params.code_challenge_method != "S256" || params.code_challenge.is_empty() {
        return error_redirect(
            &params.redirect_uri,
            "invalid_request",
            "PKCE with S256 is required",
            &params.state,
        );
    }

    let scope = if params.scope.trim().is_empty() {
        state.default_scopes.join(" ")
    } else {
        params.scope.clone()
    };

    html_page(
        StatusCode::OK,
        login_html(&LoginPage {
            client_name: &client.client_name,
            client_id: &client.client_id,
            redirect_uri: &params.redirect_uri,
            state: &params.state,
            code_challenge: &params.code_challenge,
            scope: &scope,
            error: None,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /oauth/authorize
// ---------------------------------------------------------------------------

/// Login form submission. Credentials go to the external verifier; on
/// success a code is minted and the browser is sent back to the client.
pub async fn authorize_submit(
    Extension(state): Extension<OAuthState>,
    Form(form): Form<LoginForm>,
) -> Response {
    let client = match registered_client(&state, &form.client_id, &form.redirect_uri) {
        Ok(client) => client,
        Err(status) => return status.into_response(),
    };
    if form.code_challenge.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let identity = match state.credentials.verify(&form.username, &form.password).await {
        Ok(identity) => identity,
        Err(e) => {
            match &e {
                CredentialError::Rejected => log::warn!(
                    "AUDIT DENIED login client={} username={} reason=credentials_rejected",
                    client.client_id,
                    form.username
                ),
                CredentialError::Unavailable(detail) => log::error!(
                    "AUDIT DENIED login client={} username={} reason=verifier_unavailable detail={}",
                    client.client_id,
                    form.username,
                    detail
                ),
            }
            return html_page(
                StatusCode::UNAUTHORIZED,
                login_html(&LoginPage {
                    client_name: &client.client_name,
                    client_id: &client.client_id,
                    redirect_uri: &form.redirect_uri,
                    state: &form.state,
                    code_challenge: &form.code_challenge,
                    scope: &form.scope,
                    error: Some(LOGIN_FAILED),
                }),
            );
        }
    };

    let scopes = if form.scope.trim().is_empty() {
        state.default_scopes.to_vec()
    } else {
        parse_scope(&form.scope)
    };

    let code = state.tokens.issue_auth_code(NewAuthorizationCode {
        code_challenge: form.code_challenge,
        client_id: client.client_id.clone(),
        scopes,
        redirect_uri: form.redirect_uri.clone(),
        subject: identity.subject,
        state: (!form.state.is_empty()).then(|| form.state.clone()),
    });

    Redirect::to(&success_url(&form.redirect_uri, &code, &form.state)).into_response()
}

fn registered_client(
    state: &OAuthState,
    client_id: &str,
    redirect_uri: &str,
) -> Result<OAuthClient, StatusCode> {
    let Some(client) = state.clients.get_client(client_id) else {
        log::warn!("OAuth authorize: unknown client {}", client_id);
        return Err(StatusCode::BAD_REQUEST);
    };
    if !is_registered_redirect(&client, redirect_uri) {
        log::warn!(
            "OAuth authorize: redirect_uri mismatch for client {}. Got: {}, registered: {:?}",
            client_id,
            redirect_uri,
            client.redirect_uris
        );
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(client)
}

// ---------------------------------------------------------------------------
// URL builders
// ---------------------------------------------------------------------------

fn success_url(redirect_uri: &str, code: &str, state: &str) -> String {
    let sep = if redirect_uri.contains('?') { "&" } else { "?" };
    let mut url = format!("{}{}code={}", redirect_uri, sep, urlencoding::encode(code));
    if !state.is_empty() {
        url.push_str("&state=");
        url.push_str(&urlencoding::encode(state));
    }
    url
}

fn error_redirect(redirect_uri: &str, error: &str, description: &str, state: &str) -> Response {
    let sep = if redirect_uri.contains('?') { "&" } else { "?" };
    let mut url = format!(
        "{}{}error={}&error_description={}",
        redirect_uri,
        sep,
        urlencoding::encode(error),
        urlencoding::encode(description),
    );
    if !state.is_empty() {
        url.push_str("&state=");
        url.push_str(&urlencoding::encode(state));
    }
    Redirect::to(&url).into_response()
}

// ---------------------------------------------------------------------------
// HTML login page
// ---------------------------------------------------------------------------

struct LoginPage<'a> {
    client_name: &'a str,
    client_id: &'a str,
    redirect_uri: &'a str,
    state: &'a str,
    code_challenge: &'a str,
    scope: &'a str,
    error: Option<&'a str>,
}

fn html_page(status: StatusCode, html: String) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        html,
    )
        .into_response()
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn login_html(page: &LoginPage<'_>) -> String {
    let error_block = page
        .error
        .map(|msg| format!(r#"<p class="error" role="alert">{}</p>"#, escape(msg)))
        .unwrap_or_default();

    format!(
        include_str!("login.html"),
        client_name = escape(page.client_name),
        client_id = escape(page.client_id),
        redirect_uri = escape(page.redirect_uri),
        state = escape(page.state),
        code_challenge = escape(page.code_challenge),
        scope = escape(page.scope),
        error_block = error_block,
    )
}
