use axum::extract::Extension;
use axum::Json;
use serde_json::{json, Value};

use super::OAuthState;

/// RFC 9728: Protected Resource Metadata.
/// Tells MCP clients where to find the authorization server.
///
/// `GET /.well-known/oauth-protected-resource`
pub async fn protected_resource(Extension(state): Extension<OAuthState>) -> Json<Value> {
    Json(protected_resource_document(&state))
}

/// RFC 8414: Authorization Server Metadata.
/// Describes available OAuth endpoints and capabilities.
///
/// `GET /.well-known/oauth-authorization-server`
pub async fn authorization_server(Extension(state): Extension<OAuthState>) -> Json<Value> {
    Json(authorization_server_document(&state))
}

pub fn protected_resource_document(state: &OAuthState) -> Value {
    json!({
        "resource": state.issuer.as_ref(),
        "authorization_servers": [state.issuer.as_ref()],
        "bearer_methods_supported": ["header"],
        "scopes_supported": state.default_scopes.as_ref(),
    })
}

pub fn authorization_server_document(state: &OAuthState) -> Value {
    let issuer = state.issuer.as_ref();
    let mut doc = json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{}/oauth/authorize", issuer),
        "token_endpoint": format!("{}/oauth/token", issuer),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["none", "client_secret_post", "client_secret_basic"],
        "scopes_supported": state.default_scopes.as_ref(),
    });
    if state.clients.dynamic_registration_enabled() {
        doc["registration_endpoint"] = Value::String(format!("{}/oauth/register", issuer));
    }
    doc
}
