use std::time::Duration;

use axum::{middleware as axum_middleware, routing, Extension, Json, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::config::GatewayConfig;
use crate::error::GatewayResult;
use crate::oauth::{
    authorize, metadata, registration, require_bearer, token, AuthenticatedSubject, OAuthState,
};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Assemble the OAuth endpoints plus `protected`, whose routes all require a
/// valid bearer token.
///
/// `/oauth/register` is only mounted when dynamic registration is enabled,
/// so it answers 404 otherwise.
pub fn router(state: OAuthState, protected: Router) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut public_routes = Router::new()
        // Discovery
        .route(
            "/.well-known/oauth-authorization-server",
            routing::get(metadata::authorization_server),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            routing::get(metadata::protected_resource),
        )
        // Authorization Code + PKCE
        .route(
            "/oauth/authorize",
            routing::get(authorize::authorize).post(authorize::authorize_submit),
        )
        .route("/oauth/token", routing::post(token::token_exchange));

    if state.clients.dynamic_registration_enabled() {
        public_routes = public_routes.route(
            "/oauth/register",
            routing::post(registration::register_client),
        );
    }

    // route_layer: unmatched paths fall through to a plain 404, not a challenge
    let authenticated_routes = protected.route_layer(axum_middleware::from_fn_with_state(
        state.clone(),
        require_bearer,
    ));

    Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .layer(Extension(state))
        .layer(cors)
}

/// Routes served behind the bearer gate by the standalone binary.
pub fn protected_routes() -> Router {
    Router::new().route("/api/v1/session", routing::get(session))
}

/// Echo the identity behind the presented access token.
async fn session(Extension(subject): Extension<AuthenticatedSubject>) -> Json<AuthenticatedSubject> {
    Json(subject)
}

pub async fn start_server(config: GatewayConfig) -> GatewayResult<()> {
    let state = config.build_state()?;

    log::info!(
        "OAuth gateway issuer={} dynamic_registration={}",
        state.issuer,
        state.clients.dynamic_registration_enabled()
    );

    // Lookups already ignore expired grants; this only bounds memory.
    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            sweeper.purge_expired();
        }
    });

    let app = router(state, protected_routes());

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    log::info!("OAuth gateway listening on {}", config.bind);
    axum::serve(listener, app).await?;

    Ok(())
}
