use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::types::{RegistrationRequest, RegistrationResponse};
use super::OAuthState;

/// RFC 7591 Dynamic Client Registration.
///
/// `POST /oauth/register`
///
/// Only mounted when dynamic registration is enabled. MCP clients call this
/// to register themselves before starting the authorization flow.
pub async fn register_client(
    Extension(state): Extension<OAuthState>,
    Json(req): Json<RegistrationRequest>,
) -> Response {
    let (client, secret) = match state.clients.register_client(req) {
        Ok(registered) => registered,
        Err(e) => {
            log::warn!("OAuth client registration rejected: {}", e);
            return e.into_response();
        }
    };

    log::info!(
        "OAuth client registered: name={} id={} auth_method={}",
        client.client_name,
        client.client_id,
        client.token_endpoint_auth_method
    );

    let response = RegistrationResponse {
        client_id: client.client_id,
        client_id_issued_at: client.issued_at.timestamp(),
        client_secret_expires_at: secret.as_ref().map(|_| client.secret_expires_at.wire_value()),
        client_secret: secret,
        client_name: client.client_name,
        redirect_uris: client.redirect_uris,
        grant_types: client.grant_types,
        response_types: client.response_types,
        token_endpoint_auth_method: client.token_endpoint_auth_method,
    };

    (StatusCode::CREATED, Json(response)).into_response()
}
